//! Coordinator, client and run settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use ns_search::ControllerConfig;
use ns_types::{config_error, ConfigVector, NsResult, RangeTable};

/// Default receive buffer, in bytes, for one reward or config message.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default coordinator listen address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8881";

/// Network settings for the coordinator side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Listen address (`host:port`).
    pub address: String,
    /// Number of worker connections to wait for before dispatching.
    pub num_workers: usize,
    /// Maximum bytes read for one reward reply; longer replies are truncated.
    pub buffer_size: usize,
    /// Read/write timeout on every worker connection, in milliseconds.
    /// A reply slower than this aborts the whole run, so it must exceed the
    /// longest single reward evaluation. `None`, the default, waits forever.
    pub io_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            num_workers: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            io_timeout_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(address: impl Into<String>, num_workers: usize) -> Self {
        Self {
            address: address.into(),
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout_ms = timeout.map(|t| (t.as_millis() as u64).max(1));
        self
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> NsResult<()> {
        if self.num_workers == 0 {
            return Err(config_error!("num_workers must be at least 1"));
        }
        if self.buffer_size == 0 {
            return Err(config_error!("buffer_size must be positive"));
        }
        if self.io_timeout_ms == Some(0) {
            return Err(config_error!("io_timeout_ms must be positive when set"));
        }
        Ok(())
    }
}

/// Settings for a worker-side reward client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_address: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Give up when no task arrives within this window. `None` waits forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Reward command; the config string is appended as the last argument.
    pub reward_command: Vec<String>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl ClientConfig {
    pub fn new(server_address: impl Into<String>, reward_command: Vec<String>) -> Self {
        Self {
            server_address: server_address.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout_secs: None,
            reward_command,
        }
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Build from `NS_SERVER_ADDR`, `NS_REWARD_COMMAND` (whitespace-split),
    /// `NS_BUFFER_SIZE` and `NS_IDLE_TIMEOUT_SECS` as returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> NsResult<Self> {
        let server_address =
            lookup("NS_SERVER_ADDR").unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let reward_command: Vec<String> = lookup("NS_REWARD_COMMAND")
            .ok_or_else(|| config_error!("NS_REWARD_COMMAND is required"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut config = Self::new(server_address, reward_command);
        if let Some(raw) = lookup("NS_BUFFER_SIZE") {
            config.buffer_size = raw
                .parse()
                .map_err(|e| config_error!("NS_BUFFER_SIZE {raw:?}: {e}"))?;
        }
        if let Some(raw) = lookup("NS_IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = Some(
                raw.parse()
                    .map_err(|e| config_error!("NS_IDLE_TIMEOUT_SECS {raw:?}: {e}"))?,
            );
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NsResult<()> {
        if self.reward_command.is_empty() {
            return Err(config_error!("reward_command must not be empty"));
        }
        if self.buffer_size == 0 {
            return Err(config_error!("buffer_size must be positive"));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(config_error!("idle_timeout_secs must be positive when set"));
        }
        Ok(())
    }
}

/// Everything a coordinator run needs, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    pub controller: ControllerConfig,
    pub range_table: RangeTable,
    pub max_iterations: usize,
    /// Starting point; the controller's initial vector when absent.
    #[serde(default)]
    pub init_var: Option<ConfigVector>,
    #[serde(default)]
    pub init_reward: f64,
}

impl CoordinatorSettings {
    pub fn from_json_str(json: &str) -> NsResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> NsResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read settings {}: {e}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Apply `NS_ADDR` and `NS_NUM_WORKERS` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> NsResult<()> {
        if let Some(address) = lookup("NS_ADDR") {
            self.coordinator.address = address;
        }
        if let Some(raw) = lookup("NS_NUM_WORKERS") {
            self.coordinator.num_workers = raw
                .parse()
                .map_err(|e| config_error!("NS_NUM_WORKERS {raw:?}: {e}"))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> NsResult<()> {
        self.coordinator.validate()?;
        if let Some(init_var) = &self.init_var {
            self.range_table.validate(init_var)?;
        }
        Ok(())
    }
}
