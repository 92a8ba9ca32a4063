//! Paysys Gateway Library
//!
//! This library provides the core functionality for the Paysys login gateway:
//! framing the relay protocol, recovering per-client XOR keys, checking
//! credentials against the account store, and answering within the relay's
//! reply timeout.
//!
//! ## Modules
//!
//! - `api` - Admin HTTP API (health, stats, learned keys, breakers)
//! - `auth` - Account stores and credential verification
//! - `config` - Gateway configuration management
//! - `crypto` - Repeating-key XOR cipher
//! - `error` - Error types, result definitions and protocol result codes
//! - `net` - Connection handling and session management
//! - `protocol` - Packet framing, classification and login payload parsing
//! - `resolver` - Key cache, circuit breaker, fast and slow key resolution

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod protocol;
pub mod resolver;
pub mod state;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{GatewayError, Result, ResultCode};
pub use state::AppState;

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
