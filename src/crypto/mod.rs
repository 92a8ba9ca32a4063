//! Cryptography module
//!
//! The gateway's only cipher is the repeating 16-byte XOR used to obfuscate
//! login payloads and user responses.

pub mod xor;

pub use xor::{XorKey, KEY_LEN};
