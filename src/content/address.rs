//! Content addresses
//!
//! A value is identified by the SHA-256 digest of its bytes. Two equal
//! values always share one address.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Length of a content address in bytes
pub const CONTENT_ADDRESS_LEN: usize = 32;

/// SHA-256 digest of a stored value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress([u8; CONTENT_ADDRESS_LEN]);

impl ContentAddress {
    /// Address of `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut address = [0u8; CONTENT_ADDRESS_LEN];
        address.copy_from_slice(&digest);
        Self(address)
    }

    pub fn from_bytes(bytes: [u8; CONTENT_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ADDRESS_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Returns true if `bytes` hash to this address
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Self::of(bytes) == *self
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self)
    }
}

impl FromStr for ContentAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CONTENT_ADDRESS_LEN * 2 || !s.is_ascii() {
            return Err(format!("expected {} hex digits", CONTENT_ADDRESS_LEN * 2));
        }
        let mut address = [0u8; CONTENT_ADDRESS_LEN];
        for (i, byte) in address.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid hex at {}: {}", i * 2, e))?;
        }
        Ok(Self(address))
    }
}
