//! The `error` module defines the error type surfaced to callers of the
//! `ntables` crate.
//!
//! Only locally detected misuse (a bad name, a value of the wrong type, writing
//! an unpublished topic) and setup failures (binding, configuration) reach the
//! caller. Network instability is observed through connection state, never
//! through these errors.

use thiserror::Error;

use crate::codec::{FrameFormatError, ValueType};

#[derive(Debug, Error)]
pub enum NtError {
    #[error("topic '{name}' is declared as {expected}, got a {actual} value")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("invalid topic name '{0}'")]
    InvalidName(String),

    #[error("topic '{0}' is not published by this client")]
    NotPublished(String),

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error(transparent)]
    FrameFormat(#[from] FrameFormatError),

    #[error("no common subprotocol: {0}")]
    ProtocolNegotiation(String),

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Validate a topic name supplied by a caller.
///
/// Names are slash-separated paths; an empty name or one carrying control
/// characters is rejected.
pub fn validate_name(name: &str) -> Result<(), NtError> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(NtError::InvalidName(name.to_string()));
    }
    Ok(())
}
