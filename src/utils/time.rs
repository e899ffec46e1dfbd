//! Microsecond wall clock used for value timestamps and clock-sync probes.

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
