use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Error returned when parsing a fingerprint string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintError(String);

impl fmt::Display for FingerprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid insert fingerprint: {}", self.0)
    }
}

impl std::error::Error for FingerprintError {}

/// Producer-supplied dedup key for a queued notification.
///
/// Two enqueue calls carrying the same fingerprint describe the same
/// logical notification; storage rejects the second one.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsertFingerprint([u8; 32]);

impl InsertFingerprint {
    /// Derive a fingerprint from the identifying parts of an event,
    /// e.g. `["ticket-created", "4711", "customer@example.com"]`.
    ///
    /// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn compute<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Parse a hex-encoded fingerprint.
    pub fn from_hex(s: &str) -> Result<Self, FingerprintError> {
        if s.len() != 64 {
            return Err(FingerprintError(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| FingerprintError(format!("invalid hex: {e}")))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError("decoded to wrong length".into()))?;

        Ok(Self(arr))
    }

    /// 64-character lowercase hex form, as stored in the queue.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InsertFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InsertFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for InsertFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<InsertFingerprint> for String {
    fn from(fp: InsertFingerprint) -> Self {
        fp.to_hex()
    }
}

impl Serialize for InsertFingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InsertFingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
