//! Anomaly scorer contract and the metadata-driven model loader.
//!
//! A scorer maps one sensor's window of samples to a non-negative score. The
//! machine sums the per-sensor scores and compares the total against its
//! threshold.
//!
//! Model metadata lives at `<model_dir>/<machine>/models.toml`:
//!
//! ```toml
//! [[models]]
//! name = "vib1"      # sensor name
//! window = 100       # samples per scoring window
//! mean = 0.0
//! std_dev = 0.35
//! z_threshold = 3.0
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const METADATA_FILE: &str = "models.toml";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot read model metadata {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model metadata {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no model for sensor {sensor} of machine {machine}")]
    Missing { machine: String, sensor: String },

    #[error("model {name} is unusable: {reason}")]
    Invalid { name: String, reason: String },
}

/// Opaque scoring function: batch -> score.
pub trait AnomalyScorer: Send + Sync {
    /// Samples needed for one scoring window
    fn window_len(&self) -> usize;

    fn score(&self, window: &[f64]) -> f64;
}

/// Loads one scorer per configured sensor of a machine.
pub trait ModelLoader {
    fn load_models(
        &self,
        machine: &str,
        sensors: &[String],
    ) -> Result<BTreeMap<String, Box<dyn AnomalyScorer>>, ModelError>;
}

/// Counts samples further than `z_threshold` standard deviations from the
/// trained mean.
#[derive(Debug, Clone, Deserialize)]
pub struct ZScoreModel {
    pub name: String,
    pub window: usize,
    pub mean: f64,
    pub std_dev: f64,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
}

const fn default_z_threshold() -> f64 {
    3.0
}

impl ZScoreModel {
    fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| ModelError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.window == 0 {
            return Err(invalid("window must be > 0"));
        }
        if !(self.std_dev.is_finite() && self.std_dev > 0.0) {
            return Err(invalid("std_dev must be a positive number"));
        }
        if !self.mean.is_finite() {
            return Err(invalid("mean must be finite"));
        }
        Ok(())
    }
}

impl AnomalyScorer for ZScoreModel {
    fn window_len(&self) -> usize {
        self.window
    }

    fn score(&self, window: &[f64]) -> f64 {
        window
            .iter()
            .filter(|&&x| ((x - self.mean) / self.std_dev).abs() > self.z_threshold)
            .count() as f64
    }
}

#[derive(Debug, Deserialize)]
struct ModelMetadata {
    #[serde(default)]
    models: Vec<ZScoreModel>,
}

/// Reads `models.toml` under a per-machine directory.
#[derive(Debug, Clone)]
pub struct MetadataModelLoader {
    root: PathBuf,
}

impl MetadataModelLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn metadata_path(&self, machine: &str) -> PathBuf {
        self.root.join(machine).join(METADATA_FILE)
    }

    fn read_metadata(path: &Path) -> Result<ModelMetadata, ModelError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ModelError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ModelLoader for MetadataModelLoader {
    fn load_models(
        &self,
        machine: &str,
        sensors: &[String],
    ) -> Result<BTreeMap<String, Box<dyn AnomalyScorer>>, ModelError> {
        let metadata = Self::read_metadata(&self.metadata_path(machine))?;
        let mut by_name: BTreeMap<String, ZScoreModel> = metadata
            .models
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let mut scorers: BTreeMap<String, Box<dyn AnomalyScorer>> = BTreeMap::new();
        for sensor in sensors {
            let model = by_name.remove(sensor).ok_or_else(|| ModelError::Missing {
                machine: machine.to_string(),
                sensor: sensor.clone(),
            })?;
            model.validate()?;
            scorers.insert(sensor.clone(), Box::new(model));
        }
        Ok(scorers)
    }
}
