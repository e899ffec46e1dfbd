//! The `codec` module holds the stateless wire transforms for both protocol
//! generations.
//!
//! - `value`: the type-tag space and typed values shared by NT3 and NT4.
//! - `nt3`: length-prefixed binary framing used over raw TCP.
//! - `nt4`: JSON control frames and MessagePack value frames used over WebSocket.
//!
//! Every decode failure is a `FrameFormatError`; callers drop the offending
//! frame and keep the connection.

pub mod nt3;
pub mod nt4;
pub mod value;

use std::fmt;

use thiserror::Error;

pub use value::{Value, ValueType};

/// Which decode attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Nt3,
    Nt4Json,
    Nt4MessagePack,
    /// MessagePack failed and so did the JSON fallback.
    Nt4MessagePackThenJson,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::Nt3 => "nt3",
            Codec::Nt4Json => "nt4-json",
            Codec::Nt4MessagePack => "nt4-msgpack",
            Codec::Nt4MessagePackThenJson => "nt4-msgpack+json",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{codec} frame format error: {reason}")]
pub struct FrameFormatError {
    pub codec: Codec,
    pub reason: String,
}

impl FrameFormatError {
    pub fn new(codec: Codec, reason: impl Into<String>) -> Self {
        Self {
            codec,
            reason: reason.into(),
        }
    }
}
