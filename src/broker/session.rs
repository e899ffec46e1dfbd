//! Connection session representation
//!
//! `Session` models one connected peer from the coordinator's side: its
//! protocol generation, handshake state and the sending half of its bounded
//! outbound queue. The socket itself lives in the transport task that owns
//! the receiving half.

use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::broker::message::Outgoing;
use crate::codec::nt4::{SUBPROTOCOL_V40, SUBPROTOCOL_V41};

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Nt3,
    Nt4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    ProtocolNegotiated,
    Ready,
    Closed,
}

/// Why an event could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer is not draining its queue fast enough.
    Overflow,
    /// The writer task is gone.
    Closed,
}

/// Pick the subprotocol to answer with: NT4.1 first, then NT4.0.
pub fn select_subprotocol<S: AsRef<str>>(offered: &[S]) -> Option<&'static str> {
    [SUBPROTOCOL_V41, SUBPROTOCOL_V40]
        .into_iter()
        .find(|wanted| offered.iter().any(|o| o.as_ref().trim() == *wanted))
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub generation: Generation,
    pub subprotocol: Option<String>,
    state: SessionState,
    sender: Sender<Outgoing>,
    /// Broadcast traffic held back until the handshake completes.
    held: Vec<Outgoing>,
}

impl Session {
    pub fn new(generation: Generation, subprotocol: Option<String>, sender: Sender<Outgoing>) -> Self {
        let prefix = match generation {
            Generation::Nt3 => "nt3",
            Generation::Nt4 => "nt4",
        };
        Self {
            id: format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8]),
            generation,
            subprotocol,
            state: SessionState::Connecting,
            sender,
            held: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn mark_negotiated(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::ProtocolNegotiated;
        }
    }

    /// Enter `Ready` and release everything held during the handshake.
    pub fn mark_ready(&mut self) -> Result<(), DeliveryError> {
        self.state = SessionState::Ready;
        for msg in std::mem::take(&mut self.held) {
            self.push(msg)?;
        }
        Ok(())
    }

    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
        self.held.clear();
    }

    /// Queue broadcast traffic; held until `Ready`. The hold counts against
    /// the queue's capacity.
    pub fn deliver(&mut self, msg: Outgoing) -> Result<(), DeliveryError> {
        match self.state {
            SessionState::Ready => self.push(msg),
            SessionState::Closed => Err(DeliveryError::Closed),
            SessionState::Connecting | SessionState::ProtocolNegotiated => {
                if self.held.len() >= self.sender.max_capacity() {
                    return Err(DeliveryError::Overflow);
                }
                self.held.push(msg);
                Ok(())
            }
        }
    }

    /// Queue handshake traffic regardless of state.
    pub fn send_now(&mut self, msg: Outgoing) -> Result<(), DeliveryError> {
        self.push(msg)
    }

    fn push(&self, msg: Outgoing) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Overflow,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
