//! Configuration surface consumed from the external config loader.
//! The core never reads the filesystem itself beyond this module's
//! `ConfigLoader::load` — the CLI/config-loader collaborator decides
//! which file to hand in.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DeviceKind, Protocol};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("configuration file not found")]
    FileNotFound,

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    #[error("unknown configuration field: {0}")]
    UnknownField(String),
}

/// Blanket-implemented TOML loader: any `DeserializeOwned` config struct
/// gets `load()` for free.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        toml::from_str(&content).map_err(|e| {
            let message = e.to_string();
            if message.contains("unknown field") {
                ConfigError::UnknownField(message)
            } else {
                ConfigError::ParseError(message)
            }
        })
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Log output format for the shared `tracing-subscriber` sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_service_name() -> String {
    "plantsim".to_string()
}

/// Fields shared across every binary in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_format: default_log_format(),
        }
    }
}

fn default_update_interval_s() -> f64 {
    crate::consts::DEFAULT_UPDATE_INTERVAL_S
}

fn default_realtime() -> bool {
    true
}

fn default_time_acceleration() -> f64 {
    1.0
}

/// `{updateInterval seconds, realtime bool, timeAcceleration}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationRuntimeConfig {
    #[serde(default = "default_update_interval_s")]
    pub update_interval_s: f64,
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    #[serde(default = "default_time_acceleration")]
    pub time_acceleration: f64,
}

impl Default for SimulationRuntimeConfig {
    fn default() -> Self {
        Self {
            update_interval_s: default_update_interval_s(),
            realtime: default_realtime(),
            time_acceleration: default_time_acceleration(),
        }
    }
}

impl SimulationRuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_s <= 0.0 {
            return Err(ConfigError::ValidationError(
                "simulation.runtime.update_interval_s must be > 0".into(),
            ));
        }
        if self.time_acceleration <= 0.0 || self.time_acceleration > crate::consts::MAX_SPEED_MULTIPLIER {
            return Err(ConfigError::ValidationError(format!(
                "simulation.runtime.time_acceleration must be in (0, {}]",
                crate::consts::MAX_SPEED_MULTIPLIER
            )));
        }
        Ok(())
    }
}

/// A device list entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfigEntry {
    pub name: String,
    pub kind: DeviceKind,
    pub id: u32,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

/// A transmission line in the grid topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineConfig {
    pub name: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_line_reactance")]
    pub reactance_pu: f64,
    #[serde(default = "default_line_rating")]
    pub rating_mva: f64,
}

fn default_line_reactance() -> f64 {
    0.1
}

fn default_line_rating() -> f64 {
    100.0
}

/// `{baseMVA, buses, lines{name, from, to}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridTopologyConfig {
    #[serde(default = "default_base_mva")]
    pub base_mva: f64,
    #[serde(default)]
    pub buses: Vec<String>,
    #[serde(default)]
    pub lines: Vec<LineConfig>,
    /// Fixed system load (MW), extendable to per-substation reads.
    #[serde(default = "default_fixed_load_mw")]
    pub fixed_load_mw: f64,
}

fn default_base_mva() -> f64 {
    100.0
}

fn default_fixed_load_mw() -> f64 {
    80.0
}

impl Default for GridTopologyConfig {
    fn default() -> Self {
        Self {
            base_mva: default_base_mva(),
            buses: Vec::new(),
            lines: Vec::new(),
            fixed_load_mw: default_fixed_load_mw(),
        }
    }
}

/// Per-controller-kind scan interval and bound defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerDefaults {
    #[serde(default = "default_safety_scan")]
    pub safety_scan_interval_s: f64,
    #[serde(default = "default_plc_scan")]
    pub plc_scan_interval_s: f64,
    #[serde(default = "default_slow_scan")]
    pub slow_scan_interval_s: f64,
}

fn default_safety_scan() -> f64 {
    crate::consts::DEFAULT_SAFETY_SCAN_INTERVAL_S
}
fn default_plc_scan() -> f64 {
    crate::consts::DEFAULT_PLC_SCAN_INTERVAL_S
}
fn default_slow_scan() -> f64 {
    crate::consts::DEFAULT_SLOW_SCAN_INTERVAL_S
}

impl Default for ControllerDefaults {
    fn default() -> Self {
        Self {
            safety_scan_interval_s: default_safety_scan(),
            plc_scan_interval_s: default_plc_scan(),
            slow_scan_interval_s: default_slow_scan(),
        }
    }
}

/// Top-level configuration consumed by the supervisor binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub runtime: SimulationRuntimeConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfigEntry>,
    #[serde(default)]
    pub grid: GridTopologyConfig,
    #[serde(default)]
    pub controllers: ControllerDefaults,
    #[serde(default)]
    pub audit_log_capacity: Option<usize>,
}

impl PlantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;

        let mut seen: HashMap<&str, ()> = HashMap::new();
        for device in &self.devices {
            if seen.insert(device.name.as_str(), ()).is_some() {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
        }
        if self.devices.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one device must be configured".into(),
            ));
        }
        for line in &self.grid.lines {
            let has_from = self.grid.buses.iter().any(|b| b == &line.from);
            let has_to = self.grid.buses.iter().any(|b| b == &line.to);
            if !has_from || !has_to {
                return Err(ConfigError::ValidationError(format!(
                    "line {} references an undeclared bus",
                    line.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config() {
        let toml = r#"
            [shared]
            service_name = "plantsim-test"

            [runtime]
            update_interval_s = 0.1
            realtime = false
            time_acceleration = 10.0

            [[devices]]
            name = "turbine_1"
            kind = "turbine_plc"
            id = 1

            [grid]
            base_mva = 100.0
            buses = ["bus_a"]
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        let cfg = PlantConfig::load(file.path()).expect("load");
        cfg.validate().expect("validate");
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.runtime.time_acceleration, 10.0);
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = r#"
            [shared]
            service_name = "plantsim-test"
            bogus_field = "nope"
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        let err = PlantConfig::load(file.path()).expect_err("unknown field must be rejected");
        assert!(matches!(err, ConfigError::UnknownField(_)));
    }

    #[test]
    fn rejects_duplicate_device_names() {
        let cfg = PlantConfig {
            shared: SharedConfig::default(),
            runtime: SimulationRuntimeConfig::default(),
            devices: vec![
                DeviceConfigEntry {
                    name: "a".into(),
                    kind: DeviceKind::TurbinePlc,
                    id: 1,
                    protocols: vec![],
                    description: String::new(),
                    location: String::new(),
                },
                DeviceConfigEntry {
                    name: "a".into(),
                    kind: DeviceKind::ReactorPlc,
                    id: 2,
                    protocols: vec![],
                    description: String::new(),
                    location: String::new(),
                },
            ],
            grid: GridTopologyConfig::default(),
            controllers: ControllerDefaults::default(),
            audit_log_capacity: None,
        };
        assert!(cfg.validate().is_err());
    }
}
