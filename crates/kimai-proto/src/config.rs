use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

/// Plugin-wide configuration, read from `<config_dir>/config.toml`.
///
/// Per-button settings (endpoint, API key) live with the host, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// `host:port` of the keypad host bridge.
    #[serde(default = "default_host_address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between status polls for each visible key.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Upper bound for a single JSON-RPC attempt.
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// When true, a key ignores new triggers while a reconciliation for it
    /// is still in flight. When false, overlapping requests race and the
    /// last response to arrive decides what the key shows.
    #[serde(default)]
    pub serialize: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_host_address(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

fn default_host_address() -> String {
    "127.0.0.1:28196".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

impl HostConfig {
    /// The configured address, with its port replaced when `port` is given.
    pub fn address_with_port(&self, port: Option<u16>) -> String {
        match port {
            Some(port) => {
                let host = self
                    .address
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or(&self.address);
                format!("{}:{}", host, port)
            }
            None => self.address.clone(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
