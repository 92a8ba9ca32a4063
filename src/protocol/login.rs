//! Login payload parsing
//!
//! A decrypted user-login payload has a fixed layout:
//!
//! ```text
//! 0..9    header region
//! 9..     username, NUL-terminated, at most 31 bytes
//! ..45    zero padding
//! 45..77  password digest, 32 uppercase hex characters
//! 77..    trailing session bytes
//! ```
//!
//! Relays that embed the key in the packet send a compact body instead:
//! `username\0password[\0session bytes]`.
//!
//! There is no checksum, so a successful parse is the only evidence that a
//! candidate key is correct. The checks here are deliberately strict.

use thiserror::Error;

use crate::error::ProtocolError;

/// Header bytes written by every known client build
pub const LOGIN_HEADER: [u8; 9] = [0x00, 0x0A, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00];

pub const USERNAME_OFFSET: usize = 9;
pub const PASSWORD_OFFSET: usize = 45;
pub const PASSWORD_LEN: usize = 32;
pub const MAX_USERNAME_LEN: usize = 31;

/// Shortest payload that can hold a complete structured login
pub const MIN_LOGIN_LEN: usize = PASSWORD_OFFSET + PASSWORD_LEN;

/// Decrypted login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    /// 32-character uppercase hex password digest
    pub password: String,
    /// Bytes following the password field
    pub session_data: Vec<u8>,
}

/// Why a buffer is not a login payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoginParseError {
    #[error("login payload too short: {actual} bytes (need {required})")]
    TooShort { required: usize, actual: usize },

    #[error("username is not NUL-terminated within {MAX_USERNAME_LEN} bytes")]
    MissingTerminator,

    #[error("username is empty or contains non-printable bytes")]
    InvalidUsername,

    #[error("non-zero byte in username padding")]
    DirtyPadding,

    #[error("password is not {PASSWORD_LEN} uppercase hex characters")]
    InvalidPassword,
}

impl From<LoginParseError> for ProtocolError {
    fn from(err: LoginParseError) -> Self {
        ProtocolError::MalformedPacket(err.to_string())
    }
}

#[inline]
pub(crate) fn is_username_byte(b: u8) -> bool {
    b.is_ascii_graphic()
}

#[inline]
pub(crate) fn is_password_byte(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

/// Parse the structured layout
pub fn parse_login(data: &[u8]) -> Result<LoginCredentials, ProtocolError> {
    Ok(parse_structured(data)?)
}

/// Parse the compact `username\0password` layout
pub fn parse_compact_login(data: &[u8]) -> Result<LoginCredentials, ProtocolError> {
    Ok(parse_compact(data)?)
}

/// Allocation-free check of the structured layout, used by the key search
pub(crate) fn check_structured(data: &[u8]) -> Result<usize, LoginParseError> {
    if data.len() < MIN_LOGIN_LEN {
        return Err(LoginParseError::TooShort {
            required: MIN_LOGIN_LEN,
            actual: data.len(),
        });
    }

    let span = &data[USERNAME_OFFSET..USERNAME_OFFSET + MAX_USERNAME_LEN + 1];
    let name_len = span
        .iter()
        .position(|&b| b == 0)
        .ok_or(LoginParseError::MissingTerminator)?;
    if name_len == 0 || !span[..name_len].iter().copied().all(is_username_byte) {
        return Err(LoginParseError::InvalidUsername);
    }

    let pad_start = USERNAME_OFFSET + name_len + 1;
    if data[pad_start..PASSWORD_OFFSET].iter().any(|&b| b != 0) {
        return Err(LoginParseError::DirtyPadding);
    }

    if !data[PASSWORD_OFFSET..MIN_LOGIN_LEN]
        .iter()
        .copied()
        .all(is_password_byte)
    {
        return Err(LoginParseError::InvalidPassword);
    }

    Ok(name_len)
}

fn parse_structured(data: &[u8]) -> Result<LoginCredentials, LoginParseError> {
    let name_len = check_structured(data)?;
    Ok(LoginCredentials {
        username: ascii_string(&data[USERNAME_OFFSET..USERNAME_OFFSET + name_len]),
        password: ascii_string(&data[PASSWORD_OFFSET..MIN_LOGIN_LEN]),
        session_data: data[MIN_LOGIN_LEN..].to_vec(),
    })
}

fn parse_compact(data: &[u8]) -> Result<LoginCredentials, LoginParseError> {
    let span = &data[..data.len().min(MAX_USERNAME_LEN + 1)];
    let name_len = span
        .iter()
        .position(|&b| b == 0)
        .ok_or(LoginParseError::MissingTerminator)?;
    if name_len == 0 || !span[..name_len].iter().copied().all(is_username_byte) {
        return Err(LoginParseError::InvalidUsername);
    }

    let pw_start = name_len + 1;
    let pw_end = pw_start + PASSWORD_LEN;
    if data.len() < pw_end {
        return Err(LoginParseError::TooShort {
            required: pw_end,
            actual: data.len(),
        });
    }
    let password = &data[pw_start..pw_end];
    if !password.iter().copied().all(is_password_byte) {
        return Err(LoginParseError::InvalidPassword);
    }

    let session_data = match data.get(pw_end) {
        None => Vec::new(),
        Some(0) => data[pw_end + 1..].to_vec(),
        Some(_) => return Err(LoginParseError::InvalidPassword),
    };

    Ok(LoginCredentials {
        username: ascii_string(&data[..name_len]),
        password: ascii_string(password),
        session_data,
    })
}

fn ascii_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Build a structured login payload. Used by tests, benches and tooling that
/// needs to produce traffic the parser accepts.
pub fn build_login_payload(username: &str, password: &str, session_data: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MIN_LOGIN_LEN + session_data.len());
    data.extend_from_slice(&LOGIN_HEADER);
    data.extend_from_slice(username.as_bytes());
    data.push(0);
    data.resize(PASSWORD_OFFSET, 0);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(session_data);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PASSWORD: &str = "E10ADC3949BA59ABBE56E057F20F883E";

    #[test]
    fn test_parse_structured_login() {
        let data = build_login_payload("tester_3", PASSWORD, &[1, 2, 3]);
        let creds = parse_login(&data).unwrap();
        assert_eq!(creds.username, "tester_3");
        assert_eq!(creds.password, PASSWORD);
        assert_eq!(creds.session_data, vec![1, 2, 3]);
    }

    #[test]
    fn test_short_payload_never_yields_partial_credentials() {
        let data = build_login_payload("tester_3", PASSWORD, &[]);
        for len in 0..MIN_LOGIN_LEN {
            assert!(
                parse_login(&data[..len]).is_err(),
                "length {} should not parse",
                len
            );
        }
        assert!(parse_login(&data).is_ok());
    }

    #[test]
    fn test_username_limits() {
        let longest = "a".repeat(MAX_USERNAME_LEN);
        let data = build_login_payload(&longest, PASSWORD, &[]);
        assert_eq!(parse_login(&data).unwrap().username, longest);

        let mut data = build_login_payload("x", PASSWORD, &[]);
        data[USERNAME_OFFSET] = 0;
        assert_eq!(
            check_structured(&data),
            Err(LoginParseError::InvalidUsername)
        );

        let mut data = build_login_payload("x", PASSWORD, &[]);
        for b in &mut data[USERNAME_OFFSET..PASSWORD_OFFSET] {
            *b = b'a';
        }
        assert_eq!(
            check_structured(&data),
            Err(LoginParseError::MissingTerminator)
        );
    }

    #[test]
    fn test_rejects_dirty_padding_and_bad_password() {
        let mut data = build_login_payload("player", PASSWORD, &[]);
        data[40] = 0x01;
        assert_eq!(check_structured(&data), Err(LoginParseError::DirtyPadding));

        let lower = PASSWORD.to_lowercase();
        let data = build_login_payload("player", &lower, &[]);
        assert_eq!(
            check_structured(&data),
            Err(LoginParseError::InvalidPassword)
        );

        let mut data = build_login_payload("play er", PASSWORD, &[]);
        data[USERNAME_OFFSET + 4] = b' ';
        assert_eq!(
            check_structured(&data),
            Err(LoginParseError::InvalidUsername)
        );
    }

    #[test]
    fn test_parse_compact_login() {
        let mut data = b"tester_3\0".to_vec();
        data.extend_from_slice(PASSWORD.as_bytes());
        data.push(0);
        let creds = parse_compact_login(&data).unwrap();
        assert_eq!(creds.username, "tester_3");
        assert_eq!(creds.password, PASSWORD);
        assert!(creds.session_data.is_empty());

        // Truncated password
        assert!(parse_compact_login(&data[..20]).is_err());
        // Garbage
        assert!(parse_compact_login(&[0xFF; 64]).is_err());
    }

    #[test]
    fn test_parse_error_maps_to_malformed() {
        let err: ProtocolError = LoginParseError::InvalidPassword.into();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }
}
