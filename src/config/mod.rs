//! Configuration Module
//!
//! Two TOML documents drive a deployment:
//!
//! - [`MonitorConfig`] for the monitoring server (bind addresses, storage
//!   locations, fan-out sizing, notification policy, reduction modes)
//! - [`ProducerConfig`] for a DAQ host (machines, sensors, scoring models,
//!   link targets)
//!
//! ## Loading Order (server)
//!
//! 1. `MONITOR_CONFIG` environment variable (path to TOML file)
//! 2. `monitor.toml` in the current working directory
//! 3. Built-in defaults from [`defaults`]
//!
//! Config values are passed into each subsystem at construction time.

pub mod defaults;
mod monitor_config;
mod producer_config;

pub use monitor_config::*;
pub use producer_config::*;

use std::path::PathBuf;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}
