use machine_learning::{
    arch::{
        activations::ActFn,
        rlsp::{Rlsp, RlspConfig},
    },
    dataset::Dataset,
    initialization::Init,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    ActFnConfig, Config, DatasetConfig, ModelConfig, OptimizerConfig, ParamGenConfig,
    TrainingConfig,
};
use crate::error::OrchestratorError;

/// Validates the configs and turns them into the model and the datasets of a session.
#[derive(Debug, Default)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Builds the model and splits the dataset into the training and the evaluation clips.
    pub fn adapt_configs(
        &self,
        config: &Config,
    ) -> Result<(Rlsp, Dataset, Option<Dataset>), OrchestratorError> {
        let Config { model, training } = config;

        self.validate_model(model)?;
        self.validate_training(model, training)?;

        let rlsp = self.adapt_model(model, training.optimizer)?;
        let mut train_set = self.adapt_dataset(model, training)?;

        if train_set.scale() != model.scale() || train_set.channel() != model.channel() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "dataset is x{} with {} channel(s) but the model is x{} with {}",
                train_set.scale(),
                train_set.channel(),
                model.scale(),
                model.channel()
            )));
        }

        if train_set.frames() < model.frames_needed() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "clips have {} frame(s) but the model needs {}",
                train_set.frames(),
                model.frames_needed()
            )));
        }

        if training.eval_clips >= train_set.len() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "eval_clips ({}) leaves no clips to train on ({} in total)",
                training.eval_clips,
                train_set.len()
            )));
        }

        let eval_set = (training.eval_clips > 0).then(|| train_set.split_off(training.eval_clips));

        if training.batch_size.get() > train_set.len() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "batch_size ({}) exceeds the training clips ({})",
                training.batch_size,
                train_set.len()
            )));
        }

        Ok((rlsp, train_set, eval_set))
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    fn validate_model(&self, model: &ModelConfig) -> Result<(), OrchestratorError> {
        let ModelConfig::Rlsp {
            scale,
            channel,
            clips,
            layers,
            filters,
            act_fn,
            ..
        } = *model;

        for (name, value) in [
            ("scale", scale),
            ("channel", channel),
            ("clips", clips),
            ("layers", layers),
            ("filters", filters),
        ] {
            if value == 0 {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if let ActFnConfig::Sigmoid { amp } = act_fn
            && !(amp.is_finite() && amp > 0.)
        {
            return Err(OrchestratorError::InvalidConfig(format!(
                "sigmoid amplitude must be positive, got {amp}"
            )));
        }

        Ok(())
    }

    fn validate_training(
        &self,
        model: &ModelConfig,
        training: &TrainingConfig,
    ) -> Result<(), OrchestratorError> {
        let lr = training.optimizer.learning_rate();
        if !(lr.is_finite() && lr > 0.) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "learning rate must be positive, got {lr}"
            )));
        }

        if let Some(decay) = training.lr_decay
            && !(decay.factor > 0. && decay.factor <= 1.)
        {
            return Err(OrchestratorError::InvalidConfig(format!(
                "lr_decay factor must be in (0, 1], got {}",
                decay.factor
            )));
        }

        if let DatasetConfig::Synthetic {
            clips,
            frames,
            size: (height, width),
        } = training.dataset
        {
            let scale = model.scale();

            if clips == 0 {
                return Err(OrchestratorError::InvalidConfig(
                    "dataset must have at least one clip".into(),
                ));
            }

            if frames < model.frames_needed() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "clips have {frames} frame(s) but the model needs {}",
                    model.frames_needed()
                )));
            }

            if height == 0 || width == 0 || height % scale != 0 || width % scale != 0 {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "frame size {height}x{width} is not a non-zero multiple of the scale ({scale})"
                )));
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Adaptation
    // -------------------------------------------------------------------------

    fn adapt_model(
        &self,
        model: &ModelConfig,
        optimizer: OptimizerConfig,
    ) -> Result<Rlsp, OrchestratorError> {
        let ModelConfig::Rlsp {
            scale,
            channel,
            clips,
            layers,
            filters,
            act_fn,
            init,
            seed,
        } = *model;

        let config = RlspConfig {
            scale,
            channel,
            clips,
            layers,
            filters,
            act_fn: self.adapt_act_fn(act_fn),
            init: self.adapt_init(init),
            learning_rate: optimizer.learning_rate(),
            seed,
        };

        let rlsp = Rlsp::with_optimizer(config, |len| self.adapt_optimizer(optimizer, len))?;
        Ok(rlsp)
    }

    fn adapt_dataset(
        &self,
        model: &ModelConfig,
        training: &TrainingConfig,
    ) -> Result<Dataset, OrchestratorError> {
        let dataset = match training.dataset {
            DatasetConfig::Local { ref path } => Dataset::from_safetensors(path)?,
            DatasetConfig::Synthetic {
                clips,
                frames,
                size,
            } => {
                let mut rng = match training.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };

                Dataset::synthetic(
                    &mut rng,
                    clips,
                    frames,
                    model.channel(),
                    size,
                    model.scale(),
                )?
            }
        };

        Ok(dataset)
    }

    fn adapt_optimizer(&self, optimizer: OptimizerConfig, len: usize) -> Box<dyn Optimizer> {
        match optimizer {
            OptimizerConfig::Adam { lr, b1, b2, eps } => Box::new(Adam::new(len, lr, b1, b2, eps)),
            OptimizerConfig::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
            OptimizerConfig::GradientDescentWithMomentum { lr, mu } => {
                Box::new(GradientDescentWithMomentum::new(len, lr, mu))
            }
        }
    }

    fn adapt_act_fn(&self, act_fn: ActFnConfig) -> ActFn {
        match act_fn {
            ActFnConfig::Relu => ActFn::relu(),
            ActFnConfig::Sigmoid { amp } => ActFn::sigmoid(amp),
        }
    }

    fn adapt_init(&self, init: ParamGenConfig) -> Init {
        match init {
            ParamGenConfig::Const { value } => Init::Const { value },
            ParamGenConfig::Uniform { low, high } => Init::Uniform { low, high },
            ParamGenConfig::XavierUniform => Init::XavierUniform,
            ParamGenConfig::LecunUniform => Init::LecunUniform,
            ParamGenConfig::Normal { mean, std_dev } => Init::Normal { mean, std_dev },
            ParamGenConfig::Kaiming => Init::Kaiming,
            ParamGenConfig::Xavier => Init::Xavier,
            ParamGenConfig::Lecun => Init::Lecun,
        }
    }
}
