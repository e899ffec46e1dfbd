//! The `broker` module is the authority (server role) of the engine.
//!
//! - `topic`: the topic directory and value store.
//! - `subscription`: exact/prefix subscription matching.
//! - `session`: the coordinator's view of one connection.
//! - `message`: protocol-independent outbound events and their encodings.
//! - `engine`: the coordinator that serializes every mutation and fan-out.

pub mod engine;
pub mod message;
pub mod session;
pub mod subscription;
pub mod topic;

pub use engine::{Coordinator, SharedCoordinator};

#[cfg(test)]
mod tests;
