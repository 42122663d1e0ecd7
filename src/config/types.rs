//! Configuration types

use crate::dataplane::{
    FlowTableConfig, OverflowPolicy, Policy, DEFAULT_ALLOWED_PORTS, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_ENTRIES,
};
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between idle-expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// User-defined configuration (statewall.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub flow_table: FlowTableSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_allowed_ports")]
    pub allowed_ports: Vec<u16>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_ports: default_allowed_ports(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowTableSection {
    /// 0 = unbounded
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// 0 = never expire
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub overflow: OverflowMode,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for FlowTableSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            idle_timeout_secs: default_idle_timeout_secs(),
            overflow: OverflowMode::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowMode {
    #[default]
    EvictOldest,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_allowed_ports() -> Vec<u16> {
    DEFAULT_ALLOWED_PORTS.to_vec()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Admission policy
    pub fn policy(&self) -> Policy {
        Policy::new(self.policy.allowed_ports.iter().copied())
    }

    /// Flow table capacity and expiry
    pub fn flow_table_config(&self) -> FlowTableConfig {
        let section = &self.flow_table;
        FlowTableConfig {
            max_entries: (section.max_entries > 0).then_some(section.max_entries),
            idle_timeout: (section.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(section.idle_timeout_secs)),
            overflow: match section.overflow {
                OverflowMode::EvictOldest => OverflowPolicy::EvictOldest,
                OverflowMode::Reject => OverflowPolicy::Reject,
            },
        }
    }

    /// Interval between expiry sweeps (`None` when flows never expire)
    pub fn sweep_interval(&self) -> Option<Duration> {
        let section = &self.flow_table;
        (section.idle_timeout_secs > 0 && section.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(section.sweep_interval_secs))
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.logging.level.clone(),
            format: self.logging.format.clone(),
            file: self.logging.file.clone(),
        }
    }
}
