//! Platform identities
//!
//! Every organization, bucket, task and run is identified by a `PlatformId`:
//! a non-zero 64-bit value whose canonical form is 16 lowercase hex digits.
//!
//! ## Encoding
//!
//! The binary encoding used for storage keys is the ASCII text of the
//! canonical form, so byte-lexicographic key order equals numeric order.
//! Index keys built as `encode(org) ++ name` can therefore be prefix-scanned
//! per organization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in bytes of an encoded `PlatformId`
pub const ID_LENGTH: usize = 16;

/// Errors produced while encoding or decoding a `PlatformId`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The zero ID is reserved and never valid
    #[error("invalid ID")]
    Invalid,

    /// Encoded form had the wrong length
    #[error("id must have a length of {ID_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    /// Encoded form contained a non-hex character
    #[error("id must be hexadecimal")]
    NotHex,
}

/// Fixed-width platform identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PlatformId(u64);

impl PlatformId {
    /// Wrap a raw value. Zero yields an invalid ID.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The reserved invalid ID
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Whether this ID may be encoded and stored
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Encode into the fixed-width key representation
    pub fn encode(&self) -> Result<[u8; ID_LENGTH], IdError> {
        if !self.is_valid() {
            return Err(IdError::Invalid);
        }
        let mut out = [0u8; ID_LENGTH];
        out.copy_from_slice(format!("{:016x}", self.0).as_bytes());
        Ok(out)
    }

    /// Decode from the fixed-width key representation
    pub fn decode(encoded: &[u8]) -> Result<Self, IdError> {
        if encoded.len() != ID_LENGTH {
            return Err(IdError::InvalidLength(encoded.len()));
        }
        if !encoded.iter().all(u8::is_ascii_hexdigit) {
            return Err(IdError::NotHex);
        }
        // all bytes are ASCII hex digits, so this cannot fail
        let text = std::str::from_utf8(encoded).map_err(|_| IdError::NotHex)?;
        let value = u64::from_str_radix(text, 16).map_err(|_| IdError::NotHex)?;
        let id = Self(value);
        if !id.is_valid() {
            return Err(IdError::Invalid);
        }
        Ok(id)
    }

    /// The next ID in key order, if any
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// The previous valid ID in key order, if any
    pub fn checked_prev(&self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(0) | None => None,
            Some(v) => Some(Self(v)),
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlatformId({:016x})", self.0)
    }
}

impl FromStr for PlatformId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s.as_bytes())
    }
}

impl From<u64> for PlatformId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for PlatformId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlatformId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
