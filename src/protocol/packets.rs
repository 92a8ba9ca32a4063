//! Packet definitions module
//!
//! Wire framing and the fixed packet structures of the Paysys protocol.
//! Every packet starts with a 4-byte header: `u16 size` (little-endian,
//! including the header itself) followed by `u16 type` (little-endian).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::XorKey;
use crate::error::{ProtocolError, ResultCode};

/// Size of the packet header in bytes
pub const HEADER_LEN: usize = 4;

/// Largest size a header can declare
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Body length of the user response before encryption
pub const USER_RESPONSE_BODY_LEN: usize = 64;

/// Security-key packet written to every peer immediately after accept
pub const HANDSHAKE_PACKET: [u8; 34] = [
    0x22, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF5, 0x4D, 0x3F, 0xC9, 0x5A,
    0xCF, 0xB2, 0x5E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Length of the extended header used by game packets: the basic header
/// followed by a `u32` request key
pub const EXTENDED_HEADER_LEN: usize = 8;

/// Interim "processing" packet: size 4, type 0x0001, no payload
pub const INTERIM_ACK: [u8; 4] = [0x04, 0x00, 0x01, 0x00];

/// Canned reply to the 127-byte legacy Bishop login, as captured from a
/// production relay
pub const LEGACY_BISHOP_RESPONSE: [u8; 53] = [
    0x35, 0x00, 0x97, 0x44, 0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00, 0xFA, 0x40,
    0xA1, 0x99, 0xA1, 0x37, 0x44, 0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00, 0xFA,
    0x40, 0xA1, 0x99, 0xA1, 0x37, 0x44, 0x61, 0x37, 0xCC, 0x16, 0x16, 0xB0, 0x5D, 0xD4, 0x00,
    0xFB, 0x40, 0xA1, 0x99, 0x32, 0xCA, 0x39, 0xDB,
];

/// Canned reply to a player identity check on a Bishop session, as captured
/// from a production relay (type 0xA8FF)
pub const PLAYER_IDENTITY_RESPONSE: [u8; 169] = [
    0xA9, 0x00, 0xFF, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEB, 0x49, 0xC8, 0xE7, 0x51, 0x81,
    0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA, 0x49, 0xC8, 0xE7, 0x51,
    0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA, 0x49, 0xC8, 0xE7,
    0x50, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA, 0x49, 0xC8,
    0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA, 0x49,
    0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA, 0xEA,
    0x49, 0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61, 0xFA,
    0xEA, 0x49, 0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67, 0x61,
    0xFA, 0xEA, 0x49, 0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C, 0x67,
    0x61, 0xFA, 0xEA, 0x49, 0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57, 0x5C,
    0x67, 0x61, 0xFA, 0xEA, 0x49, 0xC8, 0xE7, 0x51, 0x81, 0xE7, 0xC2, 0x03, 0xB7, 0xA8, 0x57,
    0x5C, 0x67, 0x61, 0xC1,
];

/// Total length of the legacy Bishop login variant
pub const LEGACY_BISHOP_LEN: usize = 127;

/// Total length of a Bishop login
pub const BISHOP_LOGIN_LEN: usize = 34;

/// Total length of a Bishop keep-alive ping
pub const BISHOP_PING_LEN: usize = 7;

/// Known packet type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    /// Interim acknowledgment (server -> client), user logout (client -> server)
    Ack = 0x0001,
    /// Game server login check (client -> server, extended header)
    GameLogin = 0x003E,
    /// Game server login reply (server -> client, extended header)
    GameResponse = 0x00FE,
    /// Bishop login (client -> server)
    BishopLogin = 0x0020,
    /// Bishop response (server -> client)
    BishopResponse = 0x0021,
    /// Session confirmation after a player identity check (client -> server)
    SessionConfirm = 0x14FF,
    /// Session confirmation reply (server -> client)
    SessionConfirmResponse = 0x15FF,
    /// Alternate Bishop login code seen from older relays
    BishopLoginAlt = 0x1D97,
    /// Compact verify response (server -> client)
    VerifyResponse = 0x38FF,
    /// User login (client -> server)
    UserLogin = 0x42FF,
    /// Legacy Bishop response (server -> client)
    LegacyBishopResponse = 0x4497,
    /// User login response (server -> client)
    UserResponse = 0xA8FF,
    /// Player identity check (client -> server, extended header)
    PlayerIdentity = 0xE0FF,
}

impl PacketType {
    /// Convert a wire code to a known packet type
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Ack),
            0x003E => Some(Self::GameLogin),
            0x00FE => Some(Self::GameResponse),
            0x0020 => Some(Self::BishopLogin),
            0x0021 => Some(Self::BishopResponse),
            0x14FF => Some(Self::SessionConfirm),
            0x15FF => Some(Self::SessionConfirmResponse),
            0x1D97 => Some(Self::BishopLoginAlt),
            0x38FF => Some(Self::VerifyResponse),
            0x42FF => Some(Self::UserLogin),
            0x4497 => Some(Self::LegacyBishopResponse),
            0xA8FF => Some(Self::UserResponse),
            0xE0FF => Some(Self::PlayerIdentity),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ack => "Ack",
            Self::GameLogin => "GameLogin",
            Self::GameResponse => "GameResponse",
            Self::BishopLogin => "BishopLogin",
            Self::BishopResponse => "BishopResponse",
            Self::SessionConfirm => "SessionConfirm",
            Self::SessionConfirmResponse => "SessionConfirmResponse",
            Self::BishopLoginAlt => "BishopLoginAlt",
            Self::VerifyResponse => "VerifyResponse",
            Self::UserLogin => "UserLogin",
            Self::LegacyBishopResponse => "LegacyBishopResponse",
            Self::UserResponse => "UserResponse",
            Self::PlayerIdentity => "PlayerIdentity",
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(0x{:04X})", self.name(), self.as_u16())
    }
}

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet size including the header
    pub size: u16,
    /// Raw type code
    pub packet_type: u16,
}

impl PacketHeader {
    /// Decode a header from the first four bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::PacketTooShort {
                required: HEADER_LEN,
                actual: buf.len(),
            });
        }
        let mut cursor = &buf[..HEADER_LEN];
        let size = cursor.get_u16_le();
        let packet_type = cursor.get_u16_le();
        if (size as usize) < HEADER_LEN {
            return Err(ProtocolError::InvalidDeclaredSize {
                declared: size as usize,
                minimum: HEADER_LEN,
            });
        }
        Ok(Self { size, packet_type })
    }

    /// Number of payload bytes that follow the header
    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_LEN
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.size);
        buf.put_u16_le(self.packet_type);
    }
}

/// One framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl RawPacket {
    /// Decode one packet from the front of `buf`. Bytes past the declared size
    /// are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(buf)?;
        let size = header.size as usize;
        if buf.len() < size {
            return Err(ProtocolError::PacketTooShort {
                required: size,
                actual: buf.len(),
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..size]),
        })
    }

    /// Build a packet from a header and an already-read payload
    pub fn from_parts(header: PacketHeader, payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() != header.payload_len() {
            return Err(ProtocolError::MalformedPacket(format!(
                "payload length {} does not match declared size {}",
                payload.len(),
                header.size
            )));
        }
        Ok(Self { header, payload })
    }

    /// Total wire length
    pub fn len(&self) -> usize {
        self.header.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.header.packet_type)
    }

    /// Re-encode into wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }
}

/// Fixed fields of a Bishop login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BishopLogin {
    pub field1: u32,
    pub field2: u32,
    pub field3: u32,
    /// Relay identifier
    pub bishop_id: [u8; 16],
}

impl BishopLogin {
    /// Payload bytes needed for the fixed fields
    pub const PAYLOAD_LEN: usize = 28;

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(ProtocolError::PacketTooShort {
                required: Self::PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut cursor = payload;
        let field1 = cursor.get_u32_le();
        let field2 = cursor.get_u32_le();
        let field3 = cursor.get_u32_le();
        let mut bishop_id = [0u8; 16];
        cursor.copy_to_slice(&mut bishop_id);
        Ok(Self {
            field1,
            field2,
            field3,
            bishop_id,
        })
    }
}

/// Classified incoming packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Bishop login, answered synchronously
    BishopLogin(BishopLogin),
    /// 127-byte Bishop login from older relays
    LegacyBishopLogin,
    /// Bishop keep-alive
    Ping,
    /// Obfuscated user login
    UserLogin(Bytes),
    /// User logout relayed by Bishop
    UserLogout,
    /// Game server asking whether the gateway link is up
    GameLogin { request_key: u32 },
    /// Player identity check relayed by Bishop
    PlayerIdentity { request_key: u32 },
    /// Session confirmation following a player identity check
    SessionConfirm,
    /// Anything else
    Unknown { packet_type: u16, len: usize },
}

impl PacketKind {
    pub fn name(&self) -> &'static str {
        match self {
            PacketKind::BishopLogin(_) => "BishopLogin",
            PacketKind::LegacyBishopLogin => "LegacyBishopLogin",
            PacketKind::Ping => "Ping",
            PacketKind::UserLogin(_) => "UserLogin",
            PacketKind::UserLogout => "UserLogout",
            PacketKind::GameLogin { .. } => "GameLogin",
            PacketKind::PlayerIdentity { .. } => "PlayerIdentity",
            PacketKind::SessionConfirm => "SessionConfirm",
            PacketKind::Unknown { .. } => "Unknown",
        }
    }
}

/// Classify a packet, by type code first and by total length only when the
/// code is not one a client sends
pub fn classify(packet: &RawPacket) -> Result<PacketKind, ProtocolError> {
    match packet.packet_type() {
        Some(PacketType::BishopLogin) | Some(PacketType::BishopLoginAlt) => {
            Ok(PacketKind::BishopLogin(BishopLogin::decode(&packet.payload)?))
        }
        Some(PacketType::UserLogin) => Ok(PacketKind::UserLogin(packet.payload.clone())),
        Some(PacketType::Ack) => Ok(PacketKind::UserLogout),
        Some(PacketType::GameLogin) => Ok(PacketKind::GameLogin {
            request_key: request_key(packet)?,
        }),
        Some(PacketType::PlayerIdentity) => Ok(PacketKind::PlayerIdentity {
            request_key: request_key(packet)?,
        }),
        Some(PacketType::SessionConfirm) => Ok(PacketKind::SessionConfirm),
        _ => Ok(classify_by_length(packet)),
    }
}

/// Request key carried in the extended header of game packets
fn request_key(packet: &RawPacket) -> Result<u32, ProtocolError> {
    let mut cursor = &packet.payload[..];
    if cursor.len() < EXTENDED_HEADER_LEN - HEADER_LEN {
        return Err(ProtocolError::PacketTooShort {
            required: EXTENDED_HEADER_LEN,
            actual: packet.len(),
        });
    }
    Ok(cursor.get_u32_le())
}

/// Compatibility shim for relays that send fixed-length Bishop packets
/// with unregistered type codes
fn classify_by_length(packet: &RawPacket) -> PacketKind {
    match packet.len() {
        LEGACY_BISHOP_LEN => PacketKind::LegacyBishopLogin,
        BISHOP_LOGIN_LEN => match BishopLogin::decode(&packet.payload) {
            Ok(login) => PacketKind::BishopLogin(login),
            Err(_) => unknown(packet),
        },
        BISHOP_PING_LEN => PacketKind::Ping,
        _ => unknown(packet),
    }
}

fn unknown(packet: &RawPacket) -> PacketKind {
    PacketKind::Unknown {
        packet_type: packet.header.packet_type,
        len: packet.len(),
    }
}

/// Frame `payload` under `packet_type`
pub fn encode_packet(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let size = HEADER_LEN + payload.len();
    let mut buf = BytesMut::with_capacity(size);
    PacketHeader {
        size: size as u16,
        packet_type: packet_type.as_u16(),
    }
    .encode(&mut buf);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Bishop response: header plus one result byte
pub fn encode_bishop_response(result: ResultCode) -> Vec<u8> {
    encode_packet(PacketType::BishopResponse, &[result.as_u8()])
}

/// Game response: extended header echoing the request key, then the result
/// byte and one reserved byte
pub fn encode_game_response(request_key: u32, result: ResultCode) -> Vec<u8> {
    let size = EXTENDED_HEADER_LEN + 2;
    let mut buf = BytesMut::with_capacity(size);
    PacketHeader {
        size: size as u16,
        packet_type: PacketType::GameResponse.as_u16(),
    }
    .encode(&mut buf);
    buf.put_u32_le(request_key);
    buf.put_u8(result.as_u8());
    buf.put_u8(0);
    buf.to_vec()
}

/// Session confirmation reply: success byte and one padding byte
pub fn encode_session_confirm_response() -> Vec<u8> {
    encode_packet(
        PacketType::SessionConfirmResponse,
        &[ResultCode::Success.as_u8(), 0],
    )
}

/// Compact 12-byte verify response
pub fn encode_verify_response(result: ResultCode) -> Vec<u8> {
    let mut body = [0u8; 8];
    body[0] = result.as_u8();
    let status: &[u8] = if result.is_success() { b"OK" } else { b"FAIL" };
    body[1..1 + status.len()].copy_from_slice(status);
    encode_packet(PacketType::VerifyResponse, &body)
}

/// User response: result byte, message, NUL, zero padding to 64 bytes,
/// obfuscated with the same key as the login that prompted it
pub fn encode_user_response(result: ResultCode, key: &XorKey) -> Vec<u8> {
    let message = result.message().as_bytes();
    let mut body = Vec::with_capacity(USER_RESPONSE_BODY_LEN);
    body.push(result.as_u8());
    body.extend_from_slice(message);
    body.push(0);
    body.resize(body.len().max(USER_RESPONSE_BODY_LEN), 0);
    key.apply(&mut body);
    encode_packet(PacketType::UserResponse, &body)
}

/// Decode a user response body back to its result byte and message
pub fn decode_user_response(
    packet: &RawPacket,
    key: &XorKey,
) -> Result<(u8, String), ProtocolError> {
    if packet.packet_type() != Some(PacketType::UserResponse) {
        return Err(ProtocolError::UnknownPacketType(packet.header.packet_type));
    }
    let body = key.decrypt(&packet.payload);
    let (&result, rest) = body
        .split_first()
        .ok_or_else(|| ProtocolError::MalformedPacket("empty user response".to_string()))?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Ok((result, String::from_utf8_lossy(&rest[..end]).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_rejects_short_buffers() {
        assert_eq!(
            RawPacket::decode(&[0x05, 0x00, 0x21]),
            Err(ProtocolError::PacketTooShort {
                required: 4,
                actual: 3
            })
        );
        assert!(RawPacket::decode(&[]).is_err());
    }

    #[test]
    fn test_header_rejects_declared_size_below_header() {
        assert_eq!(
            PacketHeader::decode(&[0x02, 0x00, 0x20, 0x00]),
            Err(ProtocolError::InvalidDeclaredSize {
                declared: 2,
                minimum: 4
            })
        );
    }

    #[test]
    fn test_decode_truncated_payload() {
        let err = RawPacket::decode(&[0x08, 0x00, 0xFF, 0x42, 0x01]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PacketTooShort {
                required: 8,
                actual: 5
            }
        );
    }

    #[test]
    fn test_handshake_classifies_as_bishop_login() {
        let packet = RawPacket::decode(&HANDSHAKE_PACKET).unwrap();
        assert_eq!(packet.header.size, 34);
        assert_eq!(packet.packet_type(), Some(PacketType::BishopLogin));

        match classify(&packet).unwrap() {
            PacketKind::BishopLogin(login) => {
                assert_eq!(login.field1, 0);
                assert_eq!(login.field2, 0x4DF5_0000);
                assert_eq!(login.field3, 0xCF5A_C93F);
                assert_eq!(&login.bishop_id[..3], &[0xB2, 0x5E, 0x00]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_alternate_bishop_code() {
        let mut bytes = HANDSHAKE_PACKET;
        bytes[2] = 0x97;
        bytes[3] = 0x1D;
        let packet = RawPacket::decode(&bytes).unwrap();
        assert!(matches!(classify(&packet), Ok(PacketKind::BishopLogin(_))));
    }

    #[test]
    fn test_length_shim_only_for_unknown_codes() {
        let mut legacy = vec![0u8; LEGACY_BISHOP_LEN];
        legacy[0] = LEGACY_BISHOP_LEN as u8;
        legacy[2] = 0x55;
        legacy[3] = 0x66;
        let packet = RawPacket::decode(&legacy).unwrap();
        assert_eq!(classify(&packet).unwrap(), PacketKind::LegacyBishopLogin);

        // A 127-byte user login is still a user login
        legacy[2] = 0xFF;
        legacy[3] = 0x42;
        let packet = RawPacket::decode(&legacy).unwrap();
        assert!(matches!(classify(&packet), Ok(PacketKind::UserLogin(p)) if p.len() == 123));

        let ping = [0x07, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00];
        let packet = RawPacket::decode(&ping).unwrap();
        assert_eq!(classify(&packet).unwrap(), PacketKind::Ping);

        let odd = [0x06, 0x00, 0x34, 0x12, 0x00, 0x00];
        let packet = RawPacket::decode(&odd).unwrap();
        assert_eq!(
            classify(&packet).unwrap(),
            PacketKind::Unknown {
                packet_type: 0x1234,
                len: 6
            }
        );
    }

    #[test]
    fn test_short_bishop_login_is_malformed() {
        let bytes = [0x08, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00];
        let packet = RawPacket::decode(&bytes).unwrap();
        assert!(classify(&packet).is_err());
    }

    #[test]
    fn test_bishop_response_bytes() {
        assert_eq!(
            encode_bishop_response(ResultCode::Success),
            vec![0x05, 0x00, 0x21, 0x00, 0x00]
        );
    }

    #[test]
    fn test_verify_response_bytes() {
        assert_eq!(
            encode_verify_response(ResultCode::Success),
            vec![0x0C, 0x00, 0xFF, 0x38, 0x00, b'O', b'K', 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_verify_response(ResultCode::InvalidCredentials),
            vec![0x0C, 0x00, 0xFF, 0x38, 0x03, b'F', b'A', b'I', b'L', 0, 0, 0]
        );
    }

    #[test]
    fn test_user_response_is_obfuscated_with_request_key() {
        let key: XorKey = "AD692BA79D670C500EA5AEC317FBA5AD".parse().unwrap();
        let bytes = encode_user_response(ResultCode::Success, &key);
        assert_eq!(bytes.len(), HEADER_LEN + USER_RESPONSE_BODY_LEN);
        assert_eq!(&bytes[..4], &[0x44, 0x00, 0xFF, 0xA8]);
        assert_ne!(bytes[4], 0);

        let packet = RawPacket::decode(&bytes).unwrap();
        let (code, message) = decode_user_response(&packet, &key).unwrap();
        assert_eq!(code, 0);
        assert_eq!(message, "Login successful");
    }

    #[test]
    fn test_game_packets_carry_request_key() {
        let mut game = vec![0x10, 0x00, 0x3E, 0x00, 0x78, 0x56, 0x34, 0x12];
        game.extend_from_slice(&[0xAA; 8]);
        let packet = RawPacket::decode(&game).unwrap();
        assert_eq!(
            classify(&packet).unwrap(),
            PacketKind::GameLogin {
                request_key: 0x1234_5678
            }
        );

        let mut identity = vec![0u8; 229];
        identity[0] = 229;
        identity[2] = 0xFF;
        identity[3] = 0xE0;
        identity[4] = 0x07;
        let packet = RawPacket::decode(&identity).unwrap();
        assert_eq!(
            classify(&packet).unwrap(),
            PacketKind::PlayerIdentity { request_key: 7 }
        );

        let short = [0x06, 0x00, 0x3E, 0x00, 0x01, 0x02];
        let packet = RawPacket::decode(&short).unwrap();
        assert!(classify(&packet).is_err());
    }

    #[test]
    fn test_logout_and_session_confirm() {
        let logout = [0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        let packet = RawPacket::decode(&logout).unwrap();
        assert_eq!(classify(&packet).unwrap(), PacketKind::UserLogout);

        let mut confirm = vec![0u8; 47];
        confirm[0] = 47;
        confirm[2] = 0xFF;
        confirm[3] = 0x14;
        let packet = RawPacket::decode(&confirm).unwrap();
        assert_eq!(classify(&packet).unwrap(), PacketKind::SessionConfirm);
    }

    #[test]
    fn test_game_and_confirm_response_bytes() {
        assert_eq!(
            encode_game_response(0x1234_5678, ResultCode::Success),
            vec![0x0A, 0x00, 0xFE, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00]
        );
        assert_eq!(
            encode_session_confirm_response(),
            vec![0x06, 0x00, 0xFF, 0x15, 0x00, 0x00]
        );
    }

    #[test]
    fn test_player_identity_response_declares_its_length() {
        let packet = RawPacket::decode(&PLAYER_IDENTITY_RESPONSE).unwrap();
        assert_eq!(packet.len(), PLAYER_IDENTITY_RESPONSE.len());
        assert_eq!(packet.packet_type(), Some(PacketType::UserResponse));
    }

    #[test]
    fn test_interim_ack_shape() {
        let packet = RawPacket::decode(&INTERIM_ACK).unwrap();
        assert_eq!(packet.packet_type(), Some(PacketType::Ack));
        assert!(packet.is_empty());
    }

    #[test]
    fn test_legacy_response_declares_its_length() {
        let header = PacketHeader::decode(&LEGACY_BISHOP_RESPONSE).unwrap();
        assert_eq!(header.size as usize, LEGACY_BISHOP_RESPONSE.len());
        assert_eq!(header.packet_type, PacketType::LegacyBishopResponse.as_u16());
    }
}
