//! Error types for the ledger.

use thiserror::Error;

/// Errors that can occur while reading or writing the ledger.
///
/// Every variant is fatal to the caller: losing part of the audit trail
/// is never downgraded to a warning.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An I/O error occurred.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record identifier cannot be used to name an envelope file.
    #[error("invalid record id '{id}': {reason}")]
    InvalidRecordId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A read was requested past the end of the ledger file.
    #[error("offset {offset} is beyond the end of the ledger ({len} bytes)")]
    OffsetBeyondEnd {
        /// The requested offset.
        offset: u64,
        /// The current ledger length.
        len: u64,
    },

    /// The record line was written but its envelope was not.
    #[error("record '{id}' written up to offset {offset} but its envelope failed: {source}")]
    EnvelopeWrite {
        /// The record identifier.
        id: String,
        /// Ledger offset just past the written record.
        offset: u64,
        /// The envelope write failure.
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Returns true if the record itself reached the ledger before the
    /// failure, so retrying the append would duplicate it.
    #[must_use]
    pub const fn record_written(&self) -> bool {
        matches!(self, Self::EnvelopeWrite { .. })
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
