//! Repeating-key XOR cipher
//!
//! Login payloads are obfuscated with a 16-byte key applied cyclically:
//! `plain[i] = cipher[i] ^ key[i % 16]`. The operation is its own inverse,
//! so encryption and decryption share one routine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of every XOR key in bytes
pub const KEY_LEN: usize = 16;

/// A 16-byte repeating XOR key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct XorKey([u8; KEY_LEN]);

impl XorKey {
    /// Create a key from exactly 16 bytes
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, which must be exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Key made of one repeated byte
    pub const fn repeated(byte: u8) -> Self {
        Self([byte; KEY_LEN])
    }

    /// Key made by tiling a short pattern across all 16 bytes
    pub fn tiled(pattern: &[u8]) -> Option<Self> {
        if pattern.is_empty() || KEY_LEN % pattern.len() != 0 {
            return None;
        }
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = pattern[i % pattern.len()];
        }
        Some(Self(bytes))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Key byte used at absolute position `pos`
    #[inline]
    pub fn byte_at(&self, pos: usize) -> u8 {
        self.0[pos % KEY_LEN]
    }

    /// XOR `data` in place, treating `data[0]` as stream position `offset`
    pub fn apply_at(&self, data: &mut [u8], offset: usize) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= self.byte_at(offset + i);
        }
    }

    /// XOR `data` in place from stream position zero
    pub fn apply(&self, data: &mut [u8]) {
        self.apply_at(data, 0);
    }

    /// Return a decrypted copy of `data`
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply(&mut out);
        out
    }

    /// Return an encrypted copy of `data`
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.decrypt(data)
    }

    /// Uppercase hex rendering, used for persistence and debug logs
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Debug for XorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XorKey({})", self.to_hex())
    }
}

impl fmt::Display for XorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when parsing a key from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for XorKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&cleaned).map_err(|e| KeyParseError::InvalidHex(e.to_string()))?;
        XorKey::from_slice(&bytes).ok_or(KeyParseError::WrongLength(bytes.len()))
    }
}

impl Serialize for XorKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for XorKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
