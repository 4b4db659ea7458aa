use std::path::PathBuf;

use log::{debug, info};
use machine_learning::{
    arch::{SuperResolution, rlsp::Rlsp},
    dataset::Dataset,
    metrics,
    summary::{DirWriter, SummaryWriter},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    OrchestratorError,
    configs::{LrDecayConfig, TrainingConfig},
};

/// The mean losses of a training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub total_loss: f32,
    pub image_loss: f32,
    pub learning_rate: f32,
}

/// What a running `Session` reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    EpochFinished(EpochReport),
    LearningRateDecayed { epoch: usize, learning_rate: f32 },
    Evaluated { epoch: usize, psnr: f32 },
    CheckpointSaved { epoch: usize, path: PathBuf },
}

/// Represents a training run: the model, its datasets and the schedule of the epochs.
pub struct Session {
    model: Rlsp,
    train_set: Dataset,
    eval_set: Option<Dataset>,
    epochs: usize,
    batch_size: usize,
    eval_every: usize,
    lr_decay: Option<LrDecayConfig>,
    save_dir: Option<PathBuf>,
    writer: Option<DirWriter>,
    rng: StdRng,
    epoch: usize,
    next_lr: Option<f32>,
}

impl Session {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `train_set` - The clips to train on.
    /// * `eval_set` - The clips to evaluate on, if any.
    /// * `training` - The schedule of the training.
    ///
    /// # Returns
    /// An io error if the summary directory can't be created.
    pub fn new(
        mut model: Rlsp,
        train_set: Dataset,
        eval_set: Option<Dataset>,
        training: &TrainingConfig,
    ) -> Result<Self, OrchestratorError> {
        let writer = match &training.save_dir {
            Some(dir) => {
                let writer = DirWriter::new(dir.join("summary"))?;
                model.set_writer(Box::new(writer.clone()));
                Some(writer)
            }
            None => None,
        };

        let rng = match training.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            model,
            train_set,
            eval_set,
            epochs: training.epochs.get(),
            batch_size: training.batch_size.get(),
            eval_every: training.eval_every.get(),
            lr_decay: training.lr_decay,
            save_dir: training.save_dir.clone(),
            writer,
            rng,
            epoch: 0,
            next_lr: None,
        })
    }

    pub fn model(&self) -> &Rlsp {
        &self.model
    }

    /// Returns the amount of finished epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Trains the model over every batch of the shuffled training clips.
    pub fn run_epoch(&mut self) -> Result<EpochReport, OrchestratorError> {
        self.epoch += 1;
        self.train_set.shuffle(&mut self.rng);

        let mut total_losses = Vec::new();
        let mut image_losses = Vec::new();

        for (lr, hr) in self.train_set.batches(self.batch_size) {
            let clips = lr.shape()[0];
            let losses = self.model.train(lr, hr, self.next_lr.take())?;
            total_losses.push((losses.total_loss, clips));
            image_losses.push((losses.image_loss, clips));
        }

        let report = EpochReport {
            epoch: self.epoch,
            total_loss: metrics::weighted_mean(&total_losses),
            image_loss: metrics::weighted_mean(&image_losses),
            learning_rate: self.model.learning_rate(),
        };

        if let Some(writer) = self.writer.as_mut() {
            writer.scalar("train/total_loss", report.total_loss, self.epoch)?;
            writer.scalar("train/image_loss", report.image_loss, self.epoch)?;
            writer.scalar("train/learning_rate", report.learning_rate, self.epoch)?;
        }

        Ok(report)
    }

    /// Evaluates the model over the evaluation clips.
    ///
    /// Only the last batch writes its images to the summary.
    ///
    /// # Returns
    /// The mean PSNR of every clip or `None` if there are no evaluation clips.
    pub fn evaluate(&mut self) -> Result<Option<f32>, OrchestratorError> {
        let Some(eval_set) = &self.eval_set else {
            return Ok(None);
        };

        let batches: Vec<_> = eval_set.batches(self.batch_size).collect();
        let mut psnrs = Vec::with_capacity(batches.len());

        for (i, (lr, hr)) in batches.iter().enumerate() {
            let step = (i + 1 == batches.len()).then_some(self.epoch);
            let (_, eval_metrics) = self.model.eval(lr.view(), Some(hr.view()), step)?;
            psnrs.push((eval_metrics.psnr, lr.shape()[0]));
        }

        let psnr = metrics::weighted_mean(&psnrs);
        if let Some(writer) = self.writer.as_mut() {
            writer.scalar("eval/psnr", psnr, self.epoch)?;
        }

        Ok(Some(psnr))
    }

    /// Saves the parameters of the model under the checkpoints directory.
    ///
    /// # Returns
    /// The path of the checkpoint or `None` if the session has no save directory.
    pub fn save_checkpoint(&self) -> Result<Option<PathBuf>, OrchestratorError> {
        let Some(dir) = &self.save_dir else {
            return Ok(None);
        };

        let name = format!("{}_ep{:04}.safetensors", self.model.name(), self.epoch);
        let path = dir.join("checkpoints").join(name);
        self.model.save(&path)?;

        Ok(Some(path))
    }

    /// Runs every remaining epoch, evaluating and saving the model every `eval_every` epochs
    /// and after the last one.
    ///
    /// # Arguments
    /// * `on_event` - Receives every event of the run as it happens.
    ///
    /// # Returns
    /// The trained model.
    pub fn run<F>(mut self, mut on_event: F) -> Result<Rlsp, OrchestratorError>
    where
        F: FnMut(TrainingEvent),
    {
        while self.epoch < self.epochs {
            let report = self.run_epoch()?;
            info!(
                epoch = report.epoch,
                total_loss = report.total_loss,
                image_loss = report.image_loss;
                "finished epoch"
            );
            on_event(TrainingEvent::EpochFinished(report));

            if let Some(decay) = self.lr_decay
                && self.epoch % decay.every.get() == 0
            {
                let learning_rate = self.model.learning_rate() * decay.factor;
                debug!(epoch = self.epoch, learning_rate = learning_rate; "decaying learning rate");

                self.next_lr = Some(learning_rate);
                on_event(TrainingEvent::LearningRateDecayed {
                    epoch: self.epoch,
                    learning_rate,
                });
            }

            if self.epoch % self.eval_every != 0 && self.epoch != self.epochs {
                continue;
            }

            if let Some(psnr) = self.evaluate()? {
                info!(epoch = self.epoch, psnr = psnr; "evaluated");
                on_event(TrainingEvent::Evaluated {
                    epoch: self.epoch,
                    psnr,
                });
            }

            if let Some(path) = self.save_checkpoint()? {
                info!("saved checkpoint at {}", path.display());
                on_event(TrainingEvent::CheckpointSaved {
                    epoch: self.epoch,
                    path,
                });
            }
        }

        Ok(self.model)
    }

    /// Runs every remaining epoch ignoring the events.
    pub fn wait(self) -> Result<Rlsp, OrchestratorError> {
        self.run(|_| {})
    }
}
