//! Round-trip clock synchronization.
//!
//! A probe carries the client's local time; the authority echoes it back
//! with its own time in the frame timestamp. Half the round trip is taken as
//! the link latency, and the server clock is assumed to have advanced by that
//! much since it stamped the reply.

use crate::codec::Value;
use crate::codec::nt4::{TIMESYNC_ID, ValueFrame};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockSync {
    offset: Option<i64>,
    latency: Option<u64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame to send for a probe issued at `local_now`.
    pub fn probe(local_now: u64) -> ValueFrame {
        ValueFrame::new(TIMESYNC_ID, 0, Value::Int(local_now as i64))
    }

    /// Feed an answered probe: `client_sent` as echoed back, `server_time`
    /// from the reply's timestamp.
    pub fn record(&mut self, client_sent: i64, server_time: u64, local_now: u64) {
        let rtt = (local_now as i64).saturating_sub(client_sent).max(0) as u64;
        let latency = rtt / 2;
        self.latency = Some(latency);
        self.offset = Some(server_time as i64 + latency as i64 - local_now as i64);
    }

    /// Estimated server time; local time until the first probe is answered.
    pub fn server_time(&self, local_now: u64) -> u64 {
        let offset = self.offset.unwrap_or(0);
        (local_now as i64).saturating_add(offset).max(0) as u64
    }

    pub fn latency_micros(&self) -> Option<u64> {
        self.latency
    }

    pub fn offset_micros(&self) -> Option<i64> {
        self.offset
    }
}
