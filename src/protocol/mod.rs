//! Protocol module
//!
//! This module contains the Paysys wire protocol:
//! - Packet framing, classification and fixed response encodings
//! - Login payload layout and validation

pub mod login;
pub mod packets;

pub use login::{parse_compact_login, parse_login, LoginCredentials};
pub use packets::{classify, PacketKind, PacketType, RawPacket};
