use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub client: ClientSettings,
    pub log: LogSettings,
}

/// Where the two listeners bind and how the server names itself to NT3 peers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub nt4_port: u16,
    pub nt3_port: u16,
    pub identity: String,
}

impl ServerSettings {
    pub fn nt4_addr(&self) -> String {
        format!("{}:{}", self.host, self.nt4_port)
    }

    pub fn nt3_addr(&self) -> String {
        format!("{}:{}", self.host, self.nt3_port)
    }
}

/// Per-connection limits.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    /// Queued outbound events before a session is evicted as too slow.
    pub outbound_queue_capacity: usize,
    pub handshake_timeout_ms: u64,
    /// Idle time after which an NT3 writer sends a keep-alive.
    pub nt3_keepalive_ms: u64,
}

impl SessionSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn nt3_keepalive(&self) -> Duration {
        Duration::from_millis(self.nt3_keepalive_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
    pub reconnect_interval_ms: u64,
    pub timesync_interval_ms: u64,
}

impl ClientSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn timesync_interval(&self) -> Duration {
        Duration::from_millis(self.timesync_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub client: Option<PartialClientSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub nt4_port: Option<u16>,
    pub nt3_port: Option<u16>,
    pub identity: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub outbound_queue_capacity: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub nt3_keepalive_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub reconnect_interval_ms: Option<u64>,
    pub timesync_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                nt4_port: 5810,
                nt3_port: 1735,
                identity: "ntables".to_string(),
            },
            session: SessionSettings {
                outbound_queue_capacity: 1024,
                handshake_timeout_ms: 5000,
                nt3_keepalive_ms: 1000,
            },
            client: ClientSettings {
                url: "ws://127.0.0.1:5810/nt/ntables".to_string(),
                reconnect_interval_ms: 500,
                timesync_interval_ms: 3000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay the values that were present onto `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let session = self.session.unwrap_or_default();
        let client = self.client.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                nt4_port: server.nt4_port.unwrap_or(defaults.server.nt4_port),
                nt3_port: server.nt3_port.unwrap_or(defaults.server.nt3_port),
                identity: server.identity.unwrap_or(defaults.server.identity),
            },
            session: SessionSettings {
                outbound_queue_capacity: session
                    .outbound_queue_capacity
                    .unwrap_or(defaults.session.outbound_queue_capacity),
                handshake_timeout_ms: session
                    .handshake_timeout_ms
                    .unwrap_or(defaults.session.handshake_timeout_ms),
                nt3_keepalive_ms: session
                    .nt3_keepalive_ms
                    .unwrap_or(defaults.session.nt3_keepalive_ms),
            },
            client: ClientSettings {
                url: client.url.unwrap_or(defaults.client.url),
                reconnect_interval_ms: client
                    .reconnect_interval_ms
                    .unwrap_or(defaults.client.reconnect_interval_ms),
                timesync_interval_ms: client
                    .timesync_interval_ms
                    .unwrap_or(defaults.client.timesync_interval_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(defaults.log.level),
            },
        }
    }
}
