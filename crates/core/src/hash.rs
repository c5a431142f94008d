//! Content hashes that bind a signature request to an exact document payload.
//!
//! The canonical digest is SHA-256 over the UTF-8 bytes, lowercase hex.
//! Hashes produced by clients without a digest primitive are the first 64
//! characters of the base64 encoding of the content; they are still accepted
//! by [`DocumentHash::verify`] so that older requests remain checkable.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a hex SHA-256 digest, and of a truncated base64 fallback.
const DIGEST_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    Sha256,
    Base64Truncated,
}

/// A document digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl DocumentHash {
    /// SHA-256 of `content`.
    pub fn compute(content: &str) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            value: hash_document(content),
        }
    }

    /// Classify a stored hash string. 64 lowercase hex characters is SHA-256;
    /// anything else is the base64 fallback.
    pub fn detect(value: &str) -> Self {
        let is_hex = value.len() == DIGEST_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        Self {
            algorithm: if is_hex {
                HashAlgorithm::Sha256
            } else {
                HashAlgorithm::Base64Truncated
            },
            value: value.to_string(),
        }
    }

    /// True iff `content` hashes to this value under this algorithm.
    pub fn verify(&self, content: &str) -> bool {
        let recomputed = match self.algorithm {
            HashAlgorithm::Sha256 => hash_document(content),
            HashAlgorithm::Base64Truncated => fallback_digest(content),
        };
        recomputed == self.value
    }
}

impl fmt::Display for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// SHA-256 over the UTF-8 content, hex-encoded.
pub fn hash_document(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Base64 of the content, truncated to the digest length.
pub fn fallback_digest(content: &str) -> String {
    let mut encoded = BASE64.encode(content.as_bytes());
    encoded.truncate(DIGEST_LEN);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            hash_document("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn any_content_change_breaks_verification() {
        let h = DocumentHash::compute("contract v1");
        assert!(h.verify("contract v1"));
        assert!(!h.verify("contract v1 "));
        assert!(!h.verify("contract v2"));
    }

    #[test]
    fn detect_distinguishes_fallback_hashes() {
        let sha = DocumentHash::detect(&hash_document("x"));
        assert_eq!(sha.algorithm, HashAlgorithm::Sha256);

        let legacy = DocumentHash::detect(&fallback_digest("short doc"));
        assert_eq!(legacy.algorithm, HashAlgorithm::Base64Truncated);
        assert!(legacy.verify("short doc"));
        assert!(!legacy.verify("short doc!"));
    }

    #[test]
    fn fallback_is_truncated() {
        let long = "a".repeat(500);
        assert_eq!(fallback_digest(&long).len(), DIGEST_LEN);
    }
}
