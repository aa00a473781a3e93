//! Integrity envelopes for ledger records.
//!
//! An envelope pairs a serialized record with the SHA-256 digest of that
//! serialization. This detects accidental or naive tampering but provides
//! no authenticity: anyone holding the payload can recompute the digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result};

/// Algorithm tag written into every envelope.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

/// Maximum length of a record id used as an envelope file stem.
pub const MAX_RECORD_ID_LENGTH: usize = 200;

/// A payload together with its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEnvelope {
    /// The record the payload belongs to.
    pub incident_id: String,
    /// The record serialized as JSON.
    pub payload: String,
    /// Hex-encoded SHA-256 of `payload`.
    pub signature: String,
    /// Digest algorithm, always [`SIGNATURE_ALGORITHM`].
    pub algorithm: String,
}

impl IntegrityEnvelope {
    /// Seals a payload for the given record id.
    #[must_use]
    pub fn seal(incident_id: impl Into<String>, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let signature = sha256_hex(payload.as_bytes());
        Self {
            incident_id: incident_id.into(),
            payload,
            signature,
            algorithm: SIGNATURE_ALGORITHM.to_string(),
        }
    }

    /// Returns true if the digest still matches the payload.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.algorithm == SIGNATURE_ALGORITHM
            && self.signature == sha256_hex(self.payload.as_bytes())
    }
}

/// Hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Checks that a record id is safe to use as a file stem.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidRecordId`] for empty, overlong or
/// path-like identifiers.
pub fn validate_record_id(id: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(LedgerError::InvalidRecordId {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };

    if id.is_empty() {
        return reject("id cannot be empty");
    }
    if id.len() > MAX_RECORD_ID_LENGTH {
        return reject("id is too long");
    }
    if id.contains("..") {
        return reject("id cannot contain '..'");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return reject("id may only contain [A-Za-z0-9_.-]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_of_empty_string() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn seal_sets_algorithm_and_signature() {
        let env = IntegrityEnvelope::seal("abc", "{\"state\":\"OPEN\"}");
        assert_eq!(env.algorithm, "sha256");
        assert_eq!(env.signature, sha256_hex(b"{\"state\":\"OPEN\"}"));
        assert!(env.verify());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut env = IntegrityEnvelope::seal("abc", "{\"state\":\"OPEN\"}");
        env.payload = "{\"state\":\"RESOLVED\"}".to_string();
        assert!(!env.verify());
    }

    #[test]
    fn unknown_algorithm_fails_verification() {
        let mut env = IntegrityEnvelope::seal("abc", "x");
        env.algorithm = "md5".to_string();
        assert!(!env.verify());
    }

    #[test]
    fn envelope_json_field_names() {
        let env = IntegrityEnvelope::seal("abc", "p");
        let json = serde_json::to_value(&env).unwrap();
        for key in ["incident_id", "payload", "signature", "algorithm"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn record_id_validation() {
        assert!(validate_record_id("a1b2c3").is_ok());
        assert!(validate_record_id("rule.v2-x_y").is_ok());
        assert!(validate_record_id("").is_err());
        assert!(validate_record_id("../etc/passwd").is_err());
        assert!(validate_record_id("a/b").is_err());
        assert!(validate_record_id(&"a".repeat(MAX_RECORD_ID_LENGTH + 1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_hex_ids_are_valid(id in "[0-9a-f]{64}") {
            prop_assert!(validate_record_id(&id).is_ok());
        }

        #[test]
        fn prop_sealed_envelopes_verify(payload in ".{0,256}") {
            prop_assert!(IntegrityEnvelope::seal("id", payload).verify());
        }
    }
}
