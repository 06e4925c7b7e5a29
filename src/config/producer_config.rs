//! Producer-side configuration: the machines a DAQ host aggregates and
//! where each one streams to.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::defaults;
use super::ConfigError;

/// Root producer configuration.
///
/// ```toml
/// model_dir = "./models"
///
/// [[machines]]
/// name = "press-01"
/// fault_detectable = true
/// fault_threshold = 10.0
/// sensors = [{ name = "vib1", type = "VIB" }, { name = "temp1", type = "TEMP" }]
///
/// [machines.link]
/// host = "10.0.0.5"
/// port = 8082
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Root directory holding per-machine scoring model metadata
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default)]
    pub machines: Vec<MachineConfig>,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

impl ProducerConfig {
    /// Load from a TOML file and validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a machine by name.
    pub fn machine(&self, name: &str) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let mut seen_machines = HashSet::new();

        for machine in &self.machines {
            if machine.name.trim().is_empty() {
                errors.push("machine name must not be empty".to_string());
            }
            if !seen_machines.insert(machine.name.as_str()) {
                errors.push(format!("duplicate machine name: {}", machine.name));
            }
            if machine.sensors.is_empty() {
                errors.push(format!("machine {} has no sensors", machine.name));
            }
            let mut seen_sensors = HashSet::new();
            for sensor in &machine.sensors {
                if !seen_sensors.insert(sensor.name.as_str()) {
                    errors.push(format!(
                        "machine {} declares sensor {} twice",
                        machine.name, sensor.name
                    ));
                }
            }
            if !machine.fault_threshold.is_finite() {
                errors.push(format!("machine {}: fault_threshold must be finite", machine.name));
            }
            if let Some(link) = &machine.link {
                if link.max_rate == 0 {
                    errors.push(format!("machine {}: link.max_rate must be > 0", machine.name));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// One monitored machine on the producer side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,

    /// Configured sensors in declaration order
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub fault_detectable: bool,

    #[serde(default)]
    pub fault_threshold: f64,

    /// Streaming target. Absent = no link client for this machine.
    #[serde(default)]
    pub link: Option<LinkConfig>,
}

impl MachineConfig {
    pub fn sensor_names(&self) -> Vec<String> {
        self.sensors.iter().map(|s| s.name.clone()).collect()
    }

    /// Sensor name -> declared type.
    pub fn sensor_types(&self) -> BTreeMap<String, String> {
        self.sensors
            .iter()
            .map(|s| (s.name.clone(), s.sensor_type.clone()))
            .collect()
    }
}

/// A sensor channel and its declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
}

/// Link client target and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub host: String,

    #[serde(default = "default_link_port")]
    pub port: u16,

    /// Fixed delay between reconnect attempts (seconds)
    #[serde(default = "default_retry_timeout_secs")]
    pub retry_timeout_secs: u64,

    /// Samples per sensor per update after downsampling
    #[serde(default = "default_max_rate")]
    pub max_rate: usize,
}

fn default_link_port() -> u16 {
    defaults::INGEST_ADDR
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8082)
}

const fn default_retry_timeout_secs() -> u64 {
    defaults::LINK_RETRY_TIMEOUT_SECS
}

const fn default_max_rate() -> usize {
    defaults::LINK_MAX_RATE
}

impl LinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            retry_timeout_secs: default_retry_timeout_secs(),
            max_rate: default_max_rate(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        model_dir = "/opt/models"

        [[machines]]
        name = "press-01"
        fault_detectable = true
        fault_threshold = 10.0
        sensors = [{ name = "vib1", type = "VIB" }, { name = "temp1", type = "TEMP" }]

        [machines.link]
        host = "127.0.0.1"
    "#;

    #[test]
    fn test_parse_sample() {
        let config: ProducerConfig = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        let machine = config.machine("press-01").unwrap();
        assert_eq!(machine.sensor_names(), vec!["vib1", "temp1"]);
        assert_eq!(machine.sensor_types()["vib1"], "VIB");

        let link = machine.link.as_ref().unwrap();
        assert_eq!(link.port, 8082);
        assert_eq!(link.max_rate, defaults::LINK_MAX_RATE);
        assert_eq!(link.retry_timeout_secs, defaults::LINK_RETRY_TIMEOUT_SECS);
        assert_eq!(link.address(), "127.0.0.1:8082");
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let config: ProducerConfig = toml::from_str(
            r#"
            [[machines]]
            name = "m"
            sensors = [{ name = "a", type = "VIB" }, { name = "a", type = "VIB" }]
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
