//! Content-hash keys identifying cacheable artifacts.
//!
//! A [`CacheKey`] is an immutable, fixed-width byte string. The cache never
//! interprets it: callers derive keys from whatever defines an artifact
//! (source file contents, conversion parameters, tool versions) and the cache
//! simply compares them byte-wise.
//!
//! # Text Form
//!
//! Keys render as lowercase hex for logs and the command line:
//!
//! ```
//! use asset_cache::CacheKey;
//!
//! let key = CacheKey::digest([b"texture.png".as_slice(), b"format=bc1"]);
//! let text = key.to_string();
//! assert_eq!(text.len(), 64);
//! assert_eq!(text.parse::<CacheKey>().unwrap(), key);
//! ```

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of a cache key in bytes (a SHA-256 digest).
pub const KEY_SIZE: usize = 32;

/// Errors produced when building a key from untrusted input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    /// Input had the wrong number of bytes or hex digits.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Input contained a character that is not a hex digit.
    #[error("invalid hex character {0:?} in key")]
    InvalidHex(char),
}

/// Fixed-width content hash identifying one cached artifact.
///
/// Equality, ordering and hashing are byte-wise, so keys work directly as map
/// keys on both the client (pending request table) and the server (storage).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey([u8; KEY_SIZE]);

impl CacheKey {
    /// Creates a key from raw digest bytes.
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice, which must be exactly [`KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyParseError> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| KeyParseError::InvalidLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Hashes the given inputs, in order, into a key.
    ///
    /// Each part is length-prefixed before hashing so that `["ab", "c"]` and
    /// `["a", "bc"]` produce different keys.
    pub fn digest<I, P>(parts: I) -> Self
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

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for CacheKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self)
    }
}

impl FromStr for CacheKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != KEY_SIZE * 2 {
            return Err(KeyParseError::InvalidLength {
                expected: KEY_SIZE * 2,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; KEY_SIZE];
        let mut chars = s.chars();
        for byte in bytes.iter_mut() {
            let hi = hex_value(chars.next())?;
            let lo = hex_value(chars.next())?;
            *byte = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: Option<char>) -> Result<u8, KeyParseError> {
    let c = c.unwrap_or('\0');
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(KeyParseError::InvalidHex(c))
}
