//! Streaming image integrity check.

use sha2::{Digest, Sha256};

use crate::error::ChecksumError;

const SHA256_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The manifest checksum is not a digest we can check against.
    Unverified { reason: String },
}

/// Hashes the image as it is written and compares it with the manifest
/// checksum before the image is finalized.
pub struct ChecksumVerifier {
    declared: String,
    expected: Option<[u8; 32]>,
    require: bool,
    hasher: Sha256,
}

impl ChecksumVerifier {
    pub fn new(checksum: &str, require: bool) -> Self {
        let declared = checksum.trim().to_string();
        let expected = parse_sha256(&declared);
        Self {
            declared,
            expected,
            require,
            hasher: Sha256::new(),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.expected.is_some()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> Result<Verification, ChecksumError> {
        let mut actual = [0u8; 32];
        actual.copy_from_slice(&self.hasher.finalize());
        match self.expected {
            Some(expected) if expected == actual => Ok(Verification::Verified),
            Some(expected) => Err(ChecksumError::Mismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            }),
            None if self.require => Err(ChecksumError::Unsupported(self.declared)),
            None => Ok(Verification::Unverified {
                reason: format!("checksum `{}` is not a SHA-256 digest", self.declared),
            }),
        }
    }
}

fn parse_sha256(checksum: &str) -> Option<[u8; 32]> {
    let digest = checksum
        .strip_prefix(SHA256_PREFIX)
        .unwrap_or(checksum);
    if digest.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(digest, &mut out).ok()?;
    Some(out)
}

/// Hex SHA-256 of a complete image, as published in manifests.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &[u8] = b"firmware image bytes";

    #[test]
    fn test_matching_digest_in_chunks() {
        let digest = sha256_hex(IMAGE);
        let mut verifier = ChecksumVerifier::new(&digest, true);
        assert!(verifier.is_enforced());
        for chunk in IMAGE.chunks(3) {
            verifier.update(chunk);
        }
        assert_eq!(verifier.finish(), Ok(Verification::Verified));
    }

    #[test]
    fn test_prefix_and_uppercase_accepted() {
        let digest = format!("sha256:{}", sha256_hex(IMAGE).to_uppercase());
        let mut verifier = ChecksumVerifier::new(&digest, false);
        verifier.update(IMAGE);
        assert_eq!(verifier.finish(), Ok(Verification::Verified));
    }

    #[test]
    fn test_mismatch_is_an_error() {
        let mut verifier = ChecksumVerifier::new(&sha256_hex(b"other"), false);
        verifier.update(IMAGE);
        assert!(matches!(
            verifier.finish(),
            Err(ChecksumError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_format_is_lenient_unless_required() {
        let mut lenient = ChecksumVerifier::new("abcd", false);
        assert!(!lenient.is_enforced());
        lenient.update(IMAGE);
        assert!(matches!(
            lenient.finish(),
            Ok(Verification::Unverified { .. })
        ));

        let strict = ChecksumVerifier::new("abcd", true);
        assert_eq!(
            strict.finish(),
            Err(ChecksumError::Unsupported("abcd".into()))
        );
    }

    #[test]
    fn test_non_hex_64_chars_not_enforced() {
        let verifier = ChecksumVerifier::new(&"z".repeat(64), false);
        assert!(!verifier.is_enforced());
    }
}
