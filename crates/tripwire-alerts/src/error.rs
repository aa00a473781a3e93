//! Error types for the tripwire-alerts crate.

use thiserror::Error;
use tripwire_ledger::LedgerError;

/// Errors that can occur in the alerting core.
///
/// Evaluation never surfaces these to callers (it always yields a
/// [`Decision`](crate::types::Decision)); dispatch and resolution only
/// propagate [`AlertError::Ledger`].
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid rule configuration.
    #[error("invalid rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// Invalid runtime configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The data provider could not supply a series.
    #[error("data provider failed: {reason}")]
    DataProvider {
        /// The reason the provider failed.
        reason: String,
    },

    /// A channel sender failed to deliver a notification.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// No sender is registered for a channel.
    #[error("no sender registered for channel '{channel}'")]
    ChannelUnavailable {
        /// The channel tag.
        channel: String,
    },

    /// Reading or writing the shared ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alerting operations.
pub type Result<T> = std::result::Result<T, AlertError>;
