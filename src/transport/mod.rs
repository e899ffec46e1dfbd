//! The `transport` module owns the sockets.
//!
//! - `websocket`: NT4 over WebSocket, with subprotocol negotiation.
//! - `tcp`: NT3 over raw TCP, including the NT3 hello sequence.
//!
//! Both translate wire messages into coordinator operations and drain each
//! session's outbound queue onto its socket.

pub mod tcp;
pub mod websocket;

use crate::broker::SharedCoordinator;
use crate::config::Settings;
use crate::utils::NtError;

/// Run the NT4 and NT3 listeners side by side until either fails.
pub async fn run_servers(coordinator: SharedCoordinator, settings: Settings) -> Result<(), NtError> {
    let nt4_addr = settings.server.nt4_addr();
    let nt3_addr = settings.server.nt3_addr();
    tokio::try_join!(
        websocket::start_nt4_server(&nt4_addr, coordinator.clone(), settings.clone()),
        tcp::start_nt3_server(&nt3_addr, coordinator, settings.clone()),
    )?;
    Ok(())
}

#[cfg(test)]
mod websocket_tests;
