//! Connection configuration.
//!
//! The enumerated option surface consumed by the transport core. The
//! struct is serde-derived so a supervising layer can load it straight
//! from its JSON cluster description.
//!
//! # Example
//!
//! ```
//! use colwire::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json(r#"{
//!     "port": 9042,
//!     "keepalive": true,
//!     "keepalive_time_ms": 30000,
//!     "user": "admin",
//!     "password": "secret"
//! }"#).unwrap();
//! assert_eq!(config.port, 9042);
//! assert_eq!(config.cql_version, "3.0.0");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Options consumed by a single endpoint connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server port.
    pub port: u16,
    /// Receive timeout in milliseconds, applied once a response frame has
    /// started arriving. 0 disables it.
    pub receive_timeout_ms: u64,
    /// Send timeout in milliseconds for each frame write. 0 disables it.
    pub send_timeout_ms: u64,
    /// Enable TCP keepalive probes.
    pub keepalive: bool,
    /// Keepalive idle time in milliseconds. Only applied when `keepalive`
    /// is on and the value is non-zero; the probe interval is fixed at
    /// one second.
    pub keepalive_time_ms: u64,
    /// CQL version string announced in the handshake.
    pub cql_version: String,
    /// Credentials for servers that require authentication.
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: 9042,
            receive_timeout_ms: 0,
            send_timeout_ms: 0,
            keepalive: false,
            keepalive_time_ms: 0,
            cql_version: "3.0.0".to_string(),
            user: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DriverError::Decode(format!("bad connection config: {e}")))
    }

    /// Receive timeout as a `Duration`, `None` when disabled.
    pub fn receive_timeout(&self) -> Option<Duration> {
        (self.receive_timeout_ms > 0).then(|| Duration::from_millis(self.receive_timeout_ms))
    }

    /// Send timeout as a `Duration`, `None` when disabled.
    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }

    /// Keepalive idle time, `None` when keepalive is off or unconfigured.
    pub fn keepalive_time(&self) -> Option<Duration> {
        (self.keepalive && self.keepalive_time_ms > 0)
            .then(|| Duration::from_millis(self.keepalive_time_ms))
    }
}
