//! # ntables
//!
//! `ntables` keeps a shared table of named, typed topics in sync between
//! robot-control peers. One process acts as the authority and accepts both
//! NT4 (WebSocket) and NT3 (raw TCP) clients; the client role connects to an
//! authority and reconciles local writes with what it confirms.
//!
//! ## Modules
//!
//! - `broker`: the topic directory, subscription matching, sessions and the coordinator.
//! - `client`: the reconciling client handle, clock sync and listeners.
//! - `codec`: typed values plus the NT3 and NT4 wire formats.
//! - `config`: layered settings from file and environment.
//! - `transport`: the WebSocket and TCP servers feeding the coordinator.
//! - `utils`: errors, logging and time helpers.

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod transport;
pub mod utils;
