//! # tripwire-ledger
//!
//! Append-only, newline-delimited JSON ledger for tripwire.
//!
//! The ledger is the single shared record of every incident state change.
//! Writers only ever append complete lines; readers follow the file by byte
//! offset and never see a half-written line. Compaction to the latest
//! state per record happens in each reader's memory, never on disk.
//!
//! ## Features
//!
//! - [`Ledger`]: append records, read them back incrementally
//! - [`LedgerCursor`]: remembers where the last read stopped
//! - [`IntegrityEnvelope`]: payload + SHA-256 digest, one file per record id
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tripwire_ledger::{Ledger, LedgerCursor};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Record {
//!     id: String,
//!     state: String,
//! }
//!
//! # fn main() -> Result<(), tripwire_ledger::LedgerError> {
//! let dir = tempfile::tempdir()?;
//! let ledger = Ledger::in_dir(dir.path())?;
//! let mut cursor = LedgerCursor::new();
//!
//! let record = Record { id: "abc".into(), state: "OPEN".into() };
//! let envelope = ledger.append_sealed("abc", &record)?;
//! assert!(envelope.verify());
//!
//! let batch = cursor.poll::<Record>(&ledger)?;
//! assert_eq!(batch.records.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod store;

pub use envelope::{sha256_hex, validate_record_id, IntegrityEnvelope, SIGNATURE_ALGORITHM};
pub use error::{LedgerError, Result};
pub use store::{Ledger, LedgerConfig, LedgerCursor, ReadBatch};
