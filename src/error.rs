//! Error handling module
//!
//! Defines custom error types for the Paysys gateway and the mapping from
//! internal failures onto protocol result codes.

use std::io;

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key resolution errors
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Account store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short: {actual} bytes (need at least {required})")]
    PacketTooShort { required: usize, actual: usize },

    #[error("Invalid packet size: declared {declared}, minimum {minimum}")]
    InvalidDeclaredSize { declared: usize, minimum: usize },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown packet type: 0x{0:04X}")]
    UnknownPacketType(u16),
}

/// Key resolution outcomes that are not a decoded login
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Slow path exhausted its time or candidate budget
    #[error("Resolution exhausted after {candidates} candidates")]
    Exhausted { candidates: u64 },

    /// The identity's breaker is open
    #[error("Circuit breaker open for {identity}")]
    BreakerOpen { identity: String },

    /// The global slow-path rate limit was hit
    #[error("Global resolution limit reached")]
    GlobalLimit,

    /// The slow-path worker pool is closed or saturated past the deadline
    #[error("Resolver pool unavailable")]
    PoolUnavailable,
}

/// Account store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query timed out")]
    Timeout,
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result codes carried by verify and user responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// Credentials verified
    Success = 0,
    /// Login payload could not be decoded
    ParseError = 1,
    /// Account store failed or timed out
    StoreError = 2,
    /// Username or password rejected
    InvalidCredentials = 3,
    /// Account is locked or inactive
    AccountSuspended = 4,
}

impl ResultCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Message placed in the user response body
    pub fn message(self) -> &'static str {
        match self {
            ResultCode::Success => "Login successful",
            ResultCode::ParseError => "Unable to decode login",
            ResultCode::StoreError => "Database error",
            ResultCode::InvalidCredentials => "Invalid credentials",
            ResultCode::AccountSuspended => "Account locked",
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<&StoreError> for ResultCode {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(_) => ResultCode::InvalidCredentials,
            StoreError::Unavailable(_) | StoreError::Timeout => ResultCode::StoreError,
        }
    }
}

impl From<&ResolveError> for ResultCode {
    fn from(_: &ResolveError) -> Self {
        ResultCode::ParseError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_values() {
        assert_eq!(ResultCode::Success.as_u8(), 0);
        assert_eq!(ResultCode::ParseError.as_u8(), 1);
        assert_eq!(ResultCode::StoreError.as_u8(), 2);
        assert_eq!(ResultCode::InvalidCredentials.as_u8(), 3);
        assert_eq!(ResultCode::AccountSuspended.as_u8(), 4);
    }

    #[test]
    fn test_store_error_to_result_code() {
        assert_eq!(
            ResultCode::from(&StoreError::AccountNotFound("ghost".to_string())),
            ResultCode::InvalidCredentials
        );
        assert_eq!(
            ResultCode::from(&StoreError::Unavailable("down".to_string())),
            ResultCode::StoreError
        );
        assert_eq!(ResultCode::from(&StoreError::Timeout), ResultCode::StoreError);
    }

    #[test]
    fn test_resolve_failures_never_succeed() {
        let errors = [
            ResolveError::Exhausted { candidates: 10 },
            ResolveError::BreakerOpen {
                identity: "10.0.0.1".to_string(),
            },
            ResolveError::GlobalLimit,
            ResolveError::PoolUnavailable,
        ];
        for err in &errors {
            assert!(!ResultCode::from(err).is_success());
        }
    }

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::UnknownPacketType(0x1234);
        assert_eq!(err.to_string(), "Unknown packet type: 0x1234");

        let err = ProtocolError::PacketTooShort {
            required: 4,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Packet too short: 2 bytes (need at least 4)");
    }
}
