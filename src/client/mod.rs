//! The `client` module is the caller-facing side of NetworkTables.
//!
//! - `reconciler`: local intents versus authority-confirmed state.
//! - `clock`: round-trip clock offset and latency estimation.
//! - `listener`: callback registry with kind and topic filters.
//! - `connection`: the `NtClient` handle and its reconnecting socket task.

pub mod clock;
pub mod connection;
pub mod listener;
pub mod reconciler;

pub use connection::NtClient;
pub use listener::{EventKind, ListenerOptions};
pub use reconciler::{TopicEvent, TopicInfo};
