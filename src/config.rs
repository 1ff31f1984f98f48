use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(target_os = "macos")]
const DEFAULT_PORT_FILE: &str = "/Library/Application Support/vpnd/port.txt";
#[cfg(target_os = "windows")]
const DEFAULT_PORT_FILE: &str = r"C:\Program Files\vpnd\etc\port.txt";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const DEFAULT_PORT_FILE: &str = "/opt/vpnd/mutable/port.txt";

/// Oldest daemon this client can talk to.
pub const MIN_DAEMON_VERSION: &str = "3.11.15";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent in the handshake as `<app_version>:<client name>`.
    pub app_version: String,
    pub min_daemon_version: String,
    /// Port descriptor written by the daemon.
    pub port_file: PathBuf,
    pub connect_timeout_ms: u64,
    pub hello_timeout_ms: u64,
    /// How long a connect waits for the server list after the handshake.
    pub servers_timeout_ms: u64,
    /// Ceiling for any request without a more specific timeout.
    pub response_timeout_ms: u64,
    pub login_timeout_ms: u64,
    pub installed_apps_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub ping_retry_count: u32,
    pub ping_timeout_ms: u64,
    pub worker_threads: usize,
    /// Sent as `ProtocolSecret` with every request when set.
    pub protocol_secret: Option<String>,
    /// Ping all servers in the background once a handshake completes.
    pub ping_on_connect: bool,
    /// Refresh the location whenever the tunnel goes up or down.
    pub geo_lookup_on_change: bool,
    pub geo_lookup_retry_delay_ms: u64,
    /// Turn the firewall off whenever the tunnel goes down.
    pub firewall_off_on_disconnect: bool,
    /// Preferences pushed to the daemon after every handshake.
    pub daemon_preferences: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_version: format!("{}:cli", env!("CARGO_PKG_VERSION")),
            min_daemon_version: MIN_DAEMON_VERSION.to_string(),
            port_file: PathBuf::from(DEFAULT_PORT_FILE),
            connect_timeout_ms: 3_000,
            hello_timeout_ms: 10_000,
            servers_timeout_ms: 11_000,
            response_timeout_ms: 180_000,
            login_timeout_ms: 30_000,
            installed_apps_timeout_ms: 25_000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 3_000,
            ping_retry_count: 4,
            ping_timeout_ms: 4_000,
            worker_threads: 2,
            protocol_secret: None,
            ping_on_connect: true,
            geo_lookup_on_change: false,
            geo_lookup_retry_delay_ms: 1_000,
            firewall_off_on_disconnect: false,
            daemon_preferences: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config not found at {}. Using defaults", path.display());
                Self::default()
            }
            Err(err) => {
                warn!("Failed to load {}: {err}. Using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn servers_timeout(&self) -> Duration {
        Duration::from_millis(self.servers_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn installed_apps_timeout(&self) -> Duration {
        Duration::from_millis(self.installed_apps_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn geo_lookup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.geo_lookup_retry_delay_ms)
    }

    /// Time a ping round may take on the daemon side, plus slack for the reply.
    pub fn ping_wait(&self) -> Duration {
        let rounds = u64::from(self.ping_retry_count.max(1));
        Duration::from_millis(self.ping_timeout_ms * rounds + self.hello_timeout_ms)
    }
}
