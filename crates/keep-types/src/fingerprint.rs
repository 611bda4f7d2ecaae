use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Domain tag prepended to every fingerprint computation.
const FINGERPRINT_DOMAIN: &[u8] = b"keep-schema-v1:";

/// Identifies which schema version wrote a backing file.
///
/// A `SchemaFingerprint` is the domain-separated BLAKE3 hash of a schema's
/// canonical encoding. Structurally identical schemas always produce the
/// same fingerprint, so comparing fingerprints is enough to decide whether
/// a store needs migrating.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    /// Fingerprint a canonical schema encoding.
    pub fn compute(canonical: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(canonical);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a fingerprint from a pre-computed hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaFingerprint({})", self.short_hex())
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compute_is_deterministic() {
        let a = SchemaFingerprint::compute(b"{\"Person\":{}}");
        let b = SchemaFingerprint::compute(b"{\"Person\":{}}");
        assert_eq!(a, b);
    }

    #[test]
    fn compute_is_domain_separated() {
        let data = b"schema";
        let plain = *blake3::hash(data).as_bytes();
        assert_ne!(SchemaFingerprint::compute(data).as_bytes(), &plain);
    }

    #[test]
    fn hex_roundtrip() {
        let fp = SchemaFingerprint::compute(b"test");
        let parsed = SchemaFingerprint::from_hex(&fp.to_hex()).unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = SchemaFingerprint::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        assert!(matches!(
            SchemaFingerprint::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn short_hex_is_8_chars() {
        assert_eq!(SchemaFingerprint::compute(b"x").short_hex().len(), 8);
    }

    proptest! {
        #[test]
        fn distinct_inputs_give_distinct_fingerprints(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                SchemaFingerprint::compute(a.as_bytes()),
                SchemaFingerprint::compute(b.as_bytes())
            );
        }
    }
}
