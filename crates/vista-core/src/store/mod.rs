//! Content-addressed storage for published build artifacts.
//!
//! Artifacts are keyed by their [`Version`], the leading hex digits of the
//! SHA-256 [`Digest`] of their bytes. Identical content always lands on the
//! same key, so republishing is a no-op.

pub mod fs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;

/// Number of leading hex digits of the digest used as the version token.
pub const VERSION_LEN: usize = 12;

/// SHA-256 digest of an artifact's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Compute the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    /// Hex-encoded string (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short version token derived from this digest.
    pub fn version(&self) -> Version {
        Version(self.to_hex()[..VERSION_LEN].to_string())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

/// Fixed-length lowercase hex token naming a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = s.len() == VERSION_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StoreError::InvalidVersion(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Version {
    type Error = StoreError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

/// Errors from artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(Version),

    #[error("invalid version token: {0}")]
    InvalidVersion(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Content-addressed artifact store.
pub trait ArtifactStore: Send + Sync {
    /// Publish `data` and return its digest. Identical content is not rewritten.
    fn put(&self, data: &[u8]) -> Result<Digest>;

    /// Read the artifact published under `version`.
    fn get(&self, version: &Version) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_64_hex_chars() {
        let d = Digest::compute(b"console.log(1)");
        assert_eq!(d.to_hex().len(), 64);
        assert!(d.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn version_is_digest_prefix() {
        let d = Digest::compute(b"console.log(1)");
        let v = d.version();
        assert_eq!(v.as_str().len(), VERSION_LEN);
        assert!(d.to_hex().starts_with(v.as_str()));
    }

    #[test]
    fn version_rejects_bad_tokens() {
        assert!("abc".parse::<Version>().is_err());
        assert!("../../etc/pa".parse::<Version>().is_err());
        assert!("ABCDEF012345".parse::<Version>().is_err());
        assert!("abcdef012345".parse::<Version>().is_ok());
    }

    #[test]
    fn different_data_different_version() {
        let a = Digest::compute(b"data a").version();
        let b = Digest::compute(b"data b").version();
        assert_ne!(a, b);
    }
}
