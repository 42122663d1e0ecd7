//! Configuration validation

use super::Config;
use std::collections::HashSet;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_policy(config, &mut result);
    validate_flow_table(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_policy(config: &Config, result: &mut ValidationResult) {
    let ports = &config.policy.allowed_ports;

    if ports.is_empty() {
        result.warn("policy.allowed_ports: empty, every new connection will be denied");
    }

    if ports.contains(&0) {
        result.error("policy.allowed_ports: port 0 is not a valid destination port");
    }

    let mut seen = HashSet::new();
    for port in ports {
        if !seen.insert(port) {
            result.error(format!("policy.allowed_ports: port {} listed twice", port));
        }
    }
}

fn validate_flow_table(config: &Config, result: &mut ValidationResult) {
    let table = &config.flow_table;

    if table.max_entries == 0 {
        result.warn("flow_table.max_entries: 0, table size is unbounded");
    }

    if table.idle_timeout_secs == 0 {
        result.warn("flow_table.idle_timeout_secs: 0, flows never expire");
        return;
    }

    if table.sweep_interval_secs == 0 {
        result.error("flow_table.sweep_interval_secs: must be positive when flows expire");
    } else if table.sweep_interval_secs > table.idle_timeout_secs {
        result.warn(format!(
            "flow_table.sweep_interval_secs: {}s is longer than idle timeout {}s",
            table.sweep_interval_secs, table.idle_timeout_secs
        ));
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let logging = &config.logging;

    if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            logging.level
        ));
    }

    if !LOG_FORMATS.contains(&logging.format.as_str()) {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            logging.format
        ));
    }
}
