//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `ntables` crate.
//!
//! This module centralizes the caller-facing error type, tracing setup and
//! the microsecond clock shared by the server and client roles.

pub mod error;
pub mod logging;
pub mod time;

pub use error::NtError;
