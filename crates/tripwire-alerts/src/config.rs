//! Top-level configuration.
//!
//! Read from a JSON document; every section is optional and falls back to
//! its defaults. Unknown keys are rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tripwire_ledger::LedgerConfig;

use crate::dispatcher::DispatcherConfig;
use crate::error::{AlertError, Result};
use crate::resolver::ResolverConfig;

/// Where the ledger lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerSettings {
    /// Directory holding the ledger and envelope files.
    pub dir: PathBuf,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/alerts"),
        }
    }
}

impl LedgerSettings {
    /// The ledger configuration for these settings.
    #[must_use]
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig::new(self.dir.clone())
    }
}

/// Configuration for a whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TripwireConfig {
    /// Ledger location.
    pub ledger: LedgerSettings,
    /// Dispatcher gates and channels.
    pub dispatcher: DispatcherConfig,
    /// Resolver thresholds.
    pub resolver: ResolverConfig,
}

impl TripwireConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` for malformed JSON or unknown
    /// keys, and `AlertError::InvalidConfig` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Io` if the file cannot be read, otherwise as
    /// [`TripwireConfig::from_json_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Sets the ledger directory.
    #[must_use]
    pub fn with_ledger_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ledger.dir = dir.into();
        self
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.ledger.dir.as_os_str().is_empty() {
            return Err(AlertError::InvalidConfig {
                reason: "ledger.dir cannot be empty".to_string(),
            });
        }
        self.dispatcher.validate()?;
        self.resolver.validate()
    }
}
