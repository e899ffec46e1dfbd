//! Log output for the server and client binaries.
//!
//! Session tasks already prefix their lines with `[session-id]`, so the
//! subscriber leaves module targets out.

use tracing::Level;

/// Map a configured level name to a `tracing` level. Unknown names mean
/// `info`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global fmt subscriber. Later calls leave the first one in place.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .try_init();
}
