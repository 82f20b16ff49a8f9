//! Configuration types for veil-node.
//! Parsed from ~/.veil/config.toml.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use veil_path::PathConfig;
use veil_protocol::PROTOCOL_PARAMS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub path: PathSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    /// `EnvFilter` directives. `RUST_LOG` takes precedence when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSection {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_pending_probes")]
    pub max_pending_probes: usize,
    #[serde(default = "default_lifetime_ms")]
    pub lifetime_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default)]
    pub teardown_on_reject: bool,
}

impl Default for PathSection {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            max_pending_probes: default_max_pending_probes(),
            lifetime_ms: default_lifetime_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            teardown_on_reject: false,
        }
    }
}

impl PathSection {
    pub fn to_path_config(&self) -> PathConfig {
        PathConfig {
            probe_timeout_ms: self.probe_timeout_ms,
            max_pending_probes: self.max_pending_probes,
            lifetime_ms: self.lifetime_ms,
            teardown_on_reject: self.teardown_on_reject,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

// Default value functions
fn default_name() -> String {
    "veil".into()
}
fn default_filter() -> String {
    "veil=info".into()
}
fn default_probe_timeout_ms() -> u64 {
    PROTOCOL_PARAMS.probe_timeout_ms
}
fn default_max_pending_probes() -> usize {
    PROTOCOL_PARAMS.max_pending_probes
}
fn default_lifetime_ms() -> u64 {
    PROTOCOL_PARAMS.path_lifetime_ms
}
fn default_sweep_interval_ms() -> u64 {
    PROTOCOL_PARAMS.sweep_interval_ms
}
fn default_probe_interval_ms() -> u64 {
    PROTOCOL_PARAMS.probe_interval_ms
}

impl NodeConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let path = &self.path;
        if path.sweep_interval_ms == 0 || path.probe_interval_ms == 0 {
            anyhow::bail!("path intervals must be non-zero");
        }
        if path.probe_timeout_ms == 0 {
            anyhow::bail!("path.probe_timeout_ms must be non-zero");
        }
        if path.max_pending_probes == 0 {
            anyhow::bail!("path.max_pending_probes must be at least 1");
        }
        if path.lifetime_ms == 0 {
            anyhow::bail!("path.lifetime_ms must be non-zero");
        }
        Ok(())
    }
}
