//! # Content Identity
//!
//! SHA-256 over the complete bytes of an item. Two items with identical
//! bytes share an identity regardless of file name or timestamp, which makes
//! the identity the sole dedup key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    /// Accept an existing digest string, e.g. read back from a record's
    /// properties.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn hash_bytes(data: &[u8]) -> ContentIdentity {
    ContentIdentity(format!("{:x}", Sha256::digest(data)))
}
