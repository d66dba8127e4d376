//! Tarball digests: registry-declared integrity values and streaming hashers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha512};
use thiserror::Error;

/// Errors raised while reading a registry-provided digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// The hex digest had the wrong length or non-hex characters.
    #[error("Invalid {algorithm} digest: expected {expected} hex chars, got '{value}'")]
    InvalidHex {
        /// Algorithm the digest was declared as.
        algorithm: Algorithm,
        /// Expected number of hex characters.
        expected: usize,
        /// The rejected value.
        value: String,
    },

    /// No supported algorithm appeared in a Subresource Integrity string.
    #[error("No supported digest in integrity string '{0}'")]
    Unsupported(String),

    /// The base64 body of an SRI entry could not be decoded.
    #[error("Invalid base64 in integrity string: {0}")]
    Base64(String),
}

/// Digest algorithms npm publishes for tarballs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Legacy `dist.shasum`.
    Sha1,
    /// `dist.integrity` (`sha512-<base64>`).
    Sha512,
}

impl Algorithm {
    /// Number of hex characters in a digest of this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha1 => f.write_str("sha1"),
            Self::Sha512 => f.write_str("sha512"),
        }
    }
}

/// Expected digest of a package tarball, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Integrity {
    algorithm: Algorithm,
    hex: String,
}

impl Integrity {
    /// Create a validated digest from hex (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::InvalidHex`] if `hex` is not exactly
    /// `algorithm.hex_len()` ASCII hex characters.
    pub fn from_hex(algorithm: Algorithm, hex: &str) -> Result<Self, IntegrityError> {
        if hex.len() == algorithm.hex_len() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self {
                algorithm,
                hex: hex.to_ascii_lowercase(),
            })
        } else {
            Err(IntegrityError::InvalidHex {
                algorithm,
                expected: algorithm.hex_len(),
                value: hex.to_string(),
            })
        }
    }

    /// Parse a Subresource Integrity string such as `sha512-<base64>`.
    ///
    /// When several space-separated entries are present the strongest
    /// supported one wins.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry uses a supported algorithm or the chosen
    /// entry does not decode to a digest of the right length.
    pub fn from_sri(sri: &str) -> Result<Self, IntegrityError> {
        let pick = |prefix: &str| {
            sri.split_whitespace()
                .find_map(|entry| entry.strip_prefix(prefix))
        };

        let (algorithm, encoded) = if let Some(body) = pick("sha512-") {
            (Algorithm::Sha512, body)
        } else if let Some(body) = pick("sha1-") {
            (Algorithm::Sha1, body)
        } else {
            return Err(IntegrityError::Unsupported(sri.to_string()));
        };

        // SRI allows `?options` after the digest
        let encoded = encoded.split('?').next().unwrap_or(encoded);
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| IntegrityError::Base64(e.to_string()))?;

        Self::from_hex(algorithm, &hex::encode(raw))
    }

    /// Compute the digest of `data` with the given algorithm.
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = StreamHasher::new(algorithm);
        hasher.update(data);
        Self {
            algorithm,
            hex: hasher.finalize(),
        }
    }

    /// The algorithm this digest was produced with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// A fresh incremental hasher for this digest's algorithm.
    pub fn hasher(&self) -> StreamHasher {
        StreamHasher::new(self.algorithm)
    }

    /// Compare against a hex digest produced by [`StreamHasher::finalize`].
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex)
    }
}

impl std::fmt::Display for Integrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Incremental hasher fed chunk by chunk while a tarball streams in.
#[derive(Debug, Clone)]
pub enum StreamHasher {
    /// SHA-1 state.
    Sha1(Sha1),
    /// SHA-512 state.
    Sha512(Sha512),
}

impl StreamHasher {
    /// Start hashing with the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha1 => Self::Sha1(Sha1::new()),
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Feed another chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vector() {
        let digest = Integrity::compute(Algorithm::Sha1, b"abc");
        assert_eq!(digest.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sri_prefers_sha512() {
        let data = b"tarball bytes";
        let raw = Sha512::digest(data);
        let sri = format!("sha1-AAAA sha512-{}", STANDARD.encode(raw));

        let integrity = Integrity::from_sri(&sri).unwrap();
        assert_eq!(integrity.algorithm(), Algorithm::Sha512);
        assert_eq!(integrity, Integrity::compute(Algorithm::Sha512, data));
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = Integrity::from_hex(Algorithm::Sha1, "abc123").unwrap_err();
        assert!(matches!(err, IntegrityError::InvalidHex { expected: 40, .. }));
    }

    #[test]
    fn matches_ignores_case() {
        let digest = Integrity::compute(Algorithm::Sha1, b"abc");
        assert!(digest.matches("A9993E364706816ABA3E25717850C26C9CD0D89D"));
        assert!(!digest.matches("0000"));
    }

    #[test]
    fn unsupported_sri() {
        assert!(matches!(
            Integrity::from_sri("md5-deadbeef"),
            Err(IntegrityError::Unsupported(_))
        ));
    }
}
