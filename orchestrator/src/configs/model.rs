use serde::{Deserialize, Serialize};

/// The activation of the recurrent cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnConfig {
    #[default]
    Relu,
    Sigmoid {
        amp: f32,
    },
}

/// How the weights of every convolution are initialized, biases always start at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamGenConfig {
    Const {
        value: f32,
    },
    Uniform {
        low: f32,
        high: f32,
    },
    XavierUniform,
    LecunUniform,
    Normal {
        mean: f32,
        std_dev: f32,
    },
    #[default]
    Kaiming,
    Xavier,
    Lecun,
}

fn default_clips() -> usize {
    3
}

fn default_layers() -> usize {
    7
}

fn default_filters() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelConfig {
    Rlsp {
        scale: usize,
        channel: usize,
        #[serde(default = "default_clips")]
        clips: usize,
        #[serde(default = "default_layers")]
        layers: usize,
        #[serde(default = "default_filters")]
        filters: usize,
        #[serde(default)]
        act_fn: ActFnConfig,
        #[serde(default)]
        init: ParamGenConfig,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl ModelConfig {
    pub fn scale(&self) -> usize {
        match *self {
            ModelConfig::Rlsp { scale, .. } => scale,
        }
    }

    pub fn channel(&self) -> usize {
        match *self {
            ModelConfig::Rlsp { channel, .. } => channel,
        }
    }

    /// The amount of frames needed to make a single prediction.
    ///
    /// Windows are centered on the predicted frame, so an even `clips` still needs
    /// `clips / 2` frames on each side.
    pub fn frames_needed(&self) -> usize {
        match *self {
            ModelConfig::Rlsp { clips, .. } => 2 * (clips / 2) + 1,
        }
    }
}
