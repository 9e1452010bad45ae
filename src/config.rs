//! Configuration file support.
//!
//! Settings live in a pretty-printed JSON file (`config.json` by default).
//! Keys missing from the file fall back to their defaults, and a missing
//! file means "all defaults".

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::MonitorError;
use crate::qrz::client::QRZ_XML_URL;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HamClock RESTful API base URL
    pub hamclock_api: String,
    /// Multicast group WSJT-X/JTDX sends to
    pub multicast_group: String,
    pub multicast_port: u16,
    pub qrz_username: String,
    pub qrz_password: String,
    pub qrz_url: String,
    /// Receive timeout; bounds how long `stop()` takes to be noticed
    pub receive_timeout_ms: u64,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hamclock_api: "http://localhost:8080".to_string(),
            multicast_group: "224.0.0.1".to_string(),
            multicast_port: 2237,
            qrz_username: String::new(),
            qrz_password: String::new(),
            qrz_url: QRZ_XML_URL.to_string(),
            receive_timeout_ms: 500,
            http_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Parse the configured group; it must be an IPv4 multicast address.
    pub fn multicast_group_addr(&self) -> Result<Ipv4Addr, MonitorError> {
        let group: Ipv4Addr = self
            .multicast_group
            .trim()
            .parse()
            .map_err(|_| MonitorError::InvalidGroup(self.multicast_group.clone()))?;

        if !group.is_multicast() {
            return Err(MonitorError::InvalidGroup(self.multicast_group.clone()));
        }
        Ok(group)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}
