//! Networking module
//!
//! This module handles all network-related functionality for the gateway:
//! - Framed packet reading and the per-connection writer task
//! - Session tracking and phase transitions
//! - Connection lifecycle and the user-login ack protocol

pub mod handler;
pub mod session;
pub mod transport;
