use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

/// Server settings
///
/// Deserializable, so a front-end can read it from whatever source it likes. Every field has a
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name clients address the server by
    pub name: String,
    /// Address a transport front-end binds; the in-process server only reports it
    pub listen_address: SocketAddr,
    pub heartbeat: HeartbeatConfig,
    /// How long a ballot may take before it's aborted
    pub evote_timeout: Duration,
}

impl ServerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_evote_timeout(mut self, timeout: Duration) -> Self {
        self.evote_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "server".to_owned(),
            listen_address: (Ipv4Addr::LOCALHOST, 1099).into(),
            heartbeat: HeartbeatConfig::default(),
            evote_timeout: Duration::from_secs(60),
        }
    }
}

/// Liveness monitoring settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Delay between two rounds of pings
    pub period: Duration,
    /// Consecutive missed pings after which a client is evicted
    pub max_fails: u32,
    /// How long a single ping may take
    pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
            max_fails: 2,
            ping_timeout: Duration::from_secs(1),
        }
    }
}
