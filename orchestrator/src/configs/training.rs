use std::{num::NonZeroUsize, path::PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_LEARNING_RATE: f32 = 1e-4;

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        lr: f32,
        #[serde(default = "default_beta1")]
        b1: f32,
        #[serde(default = "default_beta2")]
        b2: f32,
        #[serde(default = "default_eps")]
        eps: f32,
    },
    GradientDescent {
        lr: f32,
    },
    GradientDescentWithMomentum {
        lr: f32,
        mu: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: DEFAULT_LEARNING_RATE,
            b1: default_beta1(),
            b2: default_beta2(),
            eps: default_eps(),
        }
    }
}

impl OptimizerConfig {
    pub fn learning_rate(&self) -> f32 {
        match *self {
            Self::Adam { lr, .. }
            | Self::GradientDescent { lr }
            | Self::GradientDescentWithMomentum { lr, .. } => lr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetConfig {
    /// A safetensors file holding the `lr` and `hr` clips.
    Local { path: PathBuf },
    /// Random textures sliding across the frame, the low resolution clips are box down-scaled.
    Synthetic {
        clips: usize,
        frames: usize,
        /// The `[height, width]` of the high resolution frames.
        size: (usize, usize),
    },
}

/// Multiplies the learning rate by `factor` every `every` epochs.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LrDecayConfig {
    pub every: NonZeroUsize,
    pub factor: f32,
}

fn default_eval_every() -> NonZeroUsize {
    NonZeroUsize::MIN
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrainingConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    /// Clips held out of training to evaluate the model.
    #[serde(default)]
    pub eval_clips: usize,
    #[serde(default = "default_eval_every")]
    pub eval_every: NonZeroUsize,
    #[serde(default)]
    pub lr_decay: Option<LrDecayConfig>,
    /// Where checkpoints and summaries are written, nothing is written if `None`.
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
}
