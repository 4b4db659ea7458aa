mod adapter;
mod model;
mod training;

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

pub use adapter::Adapter;
pub use model::{ActFnConfig, ModelConfig, ParamGenConfig};
pub use training::{DatasetConfig, LrDecayConfig, OptimizerConfig, TrainingConfig};

use crate::OrchestratorError;

/// The whole configuration of a training run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl Config {
    /// Parses a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, OrchestratorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, OrchestratorError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
