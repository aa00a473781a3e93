//! File-backed append-only ledger.
//!
//! This module provides:
//! - [`Ledger`]: JSON-lines record log plus per-record envelope files
//! - [`LedgerConfig`]: where the ledger lives on disk
//! - [`ReadBatch`] and [`LedgerCursor`]: incremental reads by byte offset
//!
//! Lines are never rewritten or deleted. Each append is a single
//! `write_all` of a complete line on an append-mode handle followed by a
//! flush, so concurrent writers never interleave partial lines. Readers
//! treat a trailing line without its newline as not yet visible.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::envelope::{validate_record_id, IntegrityEnvelope};
use crate::error::{LedgerError, Result};

/// Configuration for a file-backed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory holding the ledger file and the envelope directory.
    pub dir: PathBuf,
    /// File name of the JSON-lines ledger inside `dir`.
    pub ledger_file: String,
    /// Sub-directory of `dir` holding one envelope file per record id.
    pub envelope_dir: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ledger"),
            ledger_file: "incidents.jsonl".to_string(),
            envelope_dir: "envelopes".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Creates a config rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the ledger file name.
    #[must_use]
    pub fn with_ledger_file(mut self, name: impl Into<String>) -> Self {
        self.ledger_file = name.into();
        self
    }

    /// Sets the envelope directory name.
    #[must_use]
    pub fn with_envelope_dir(mut self, name: impl Into<String>) -> Self {
        self.envelope_dir = name.into();
        self
    }
}

/// Records parsed by one incremental read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBatch<T> {
    /// Records in append order.
    pub records: Vec<T>,
    /// Offset just past the last complete line consumed.
    pub next_offset: u64,
    /// Complete lines that could not be parsed.
    pub skipped: usize,
}

impl<T> ReadBatch<T> {
    const fn empty(offset: u64) -> Self {
        Self {
            records: Vec::new(),
            next_offset: offset,
            skipped: 0,
        }
    }
}

/// Append-only JSON-lines ledger.
#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    ledger_path: PathBuf,
    envelope_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Opens (creating if needed) the ledger described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(config: LedgerConfig) -> Result<Self> {
        let ledger_path = config.dir.join(&config.ledger_file);
        let envelope_path = config.dir.join(&config.envelope_dir);
        fs::create_dir_all(&config.dir)?;
        fs::create_dir_all(&envelope_path)?;

        debug!(path = %ledger_path.display(), "opened ledger");

        Ok(Self {
            config,
            ledger_path,
            envelope_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Opens a ledger with default file names inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(LedgerConfig::new(dir))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Path of the JSON-lines file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.ledger_path
    }

    /// Current size of the ledger file in bytes (0 if not yet created).
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn len_bytes(&self) -> Result<u64> {
        match fs::metadata(&self.ledger_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Appends one record as a single line.
    ///
    /// Returns the byte offset just past the record. Records appended later
    /// by other writers do not move it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<u64> {
        let line = serde_json::to_string(record)?;
        self.append_line(&self.ledger_path, &line)
    }

    /// Appends a record and its integrity envelope.
    ///
    /// The envelope payload is byte-identical to the ledger line without
    /// its trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not a valid record id or the record
    /// cannot be written. If only the envelope write fails the error is
    /// [`LedgerError::EnvelopeWrite`] and the record line stays in place.
    pub fn append_sealed<T: Serialize>(&self, id: &str, record: &T) -> Result<IntegrityEnvelope> {
        validate_record_id(id)?;
        let payload = serde_json::to_string(record)?;
        let offset = self.append_line(&self.ledger_path, &payload)?;

        let envelope = IntegrityEnvelope::seal(id, payload);
        if let Err(e) = self.append_envelope(&envelope) {
            warn!(id = %id, offset, error = %e, "record written without envelope");
            return Err(LedgerError::EnvelopeWrite {
                id: id.to_string(),
                offset,
                source: Box::new(e),
            });
        }
        Ok(envelope)
    }

    /// Appends an envelope to the per-record envelope file.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the write fails.
    pub fn append_envelope(&self, envelope: &IntegrityEnvelope) -> Result<PathBuf> {
        let path = self.envelope_file(&envelope.incident_id)?;
        let line = serde_json::to_string(envelope)?;
        self.append_line(&path, &line)?;
        Ok(path)
    }

    /// Reads every envelope recorded for `id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the file cannot be read.
    pub fn read_envelopes(&self, id: &str) -> Result<Vec<IntegrityEnvelope>> {
        let path = self.envelope_file(id)?;
        Ok(read_complete_lines(&path, 0)?.records)
    }

    /// Reads every complete record in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<ReadBatch<T>> {
        self.read_from(0)
    }

    /// Reads complete records appended at or after `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::OffsetBeyondEnd`] if the file is shorter than
    /// `offset`, or an I/O error if it cannot be read.
    pub fn read_from<T: DeserializeOwned>(&self, offset: u64) -> Result<ReadBatch<T>> {
        read_complete_lines(&self.ledger_path, offset)
    }

    fn envelope_file(&self, id: &str) -> Result<PathBuf> {
        validate_record_id(id)?;
        Ok(self.envelope_path.join(format!("{id}.jsonl")))
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<u64> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        // append mode leaves the handle positioned at the end of our write
        Ok(file.stream_position()?)
    }
}

fn read_complete_lines<T: DeserializeOwned>(path: &Path, offset: u64) -> Result<ReadBatch<T>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if offset == 0 {
                return Ok(ReadBatch::empty(0));
            }
            return Err(LedgerError::OffsetBeyondEnd { offset, len: 0 });
        }
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    if offset > len {
        return Err(LedgerError::OffsetBeyondEnd { offset, len });
    }
    if offset == len {
        return Ok(ReadBatch::empty(offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf)?;

    // Anything after the last newline is a write still in flight.
    let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);

    let mut batch = ReadBatch::empty(offset + complete as u64);
    for line in buf[..complete].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<T>(line) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                batch.skipped += 1;
                warn!(path = %path.display(), error = %e, "skipping malformed ledger line");
            }
        }
    }

    Ok(batch)
}

/// Tracks a read position in a [`Ledger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCursor {
    offset: u64,
}

impl LedgerCursor {
    /// A cursor at the start of the ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self { offset: 0 }
    }

    /// The next byte offset to read from.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads records appended since the last poll and advances.
    ///
    /// # Errors
    ///
    /// Propagates any read error; the cursor does not move on error.
    pub fn poll<T: DeserializeOwned>(&mut self, ledger: &Ledger) -> Result<ReadBatch<T>> {
        let batch = ledger.read_from(self.offset)?;
        self.offset = batch.next_offset;
        Ok(batch)
    }
}
