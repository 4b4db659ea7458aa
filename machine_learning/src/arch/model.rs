use std::path::Path;

use ndarray::{Array4, ArrayView5};

use crate::Result;

/// The losses of a single training call, averaged over the frames of the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Losses {
    pub total_loss: f32,
    pub image_loss: f32,
}

impl Losses {
    /// Iterates the losses by name.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        [
            ("total_loss", self.total_loss),
            ("image_loss", self.image_loss),
        ]
        .into_iter()
    }
}

/// The metrics of a single evaluation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    /// Mean PSNR over the predicted frames, `NaN` when no labels were given.
    pub psnr: f32,
}

impl EvalMetrics {
    /// Iterates the metrics by name.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        [("psnr", self.psnr)].into_iter()
    }
}

/// A video super-resolution model.
///
/// Clips are `(batch, time, channel, height, width)` tensors, the labels having the spatial
/// size of the inputs multiplied by `scale()`.
pub trait SuperResolution {
    /// The name of the model, used to tag its summaries.
    fn name(&self) -> &str;

    /// The up-scaling factor.
    fn scale(&self) -> usize;

    /// The channels of every frame.
    fn channel(&self) -> usize;

    /// Returns the amount of trainable parameters.
    fn size(&self) -> usize;

    /// Makes a single optimization step over a batch of clips.
    ///
    /// # Arguments
    /// * `inputs` - The low resolution clips.
    /// * `labels` - The high resolution clips.
    /// * `learning_rate` - If given, overrides the learning rate for this and the following steps.
    fn train(
        &mut self,
        inputs: ArrayView5<f32>,
        labels: ArrayView5<f32>,
        learning_rate: Option<f32>,
    ) -> Result<Losses>;

    /// Predicts every frame the model can predict of a batch of clips.
    ///
    /// # Arguments
    /// * `inputs` - The low resolution clips.
    /// * `labels` - The high resolution clips, needed to compute the metrics.
    /// * `epoch` - The step used to tag the summaries. Nothing is written without one.
    ///
    /// # Returns
    /// The predicted frames `(batch, channel, height·scale, width·scale)` in order and the
    /// metrics of the prediction.
    fn eval(
        &mut self,
        inputs: ArrayView5<f32>,
        labels: Option<ArrayView5<f32>>,
        epoch: Option<usize>,
    ) -> Result<(Vec<Array4<f32>>, EvalMetrics)>;

    /// Saves the parameters of the model.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restores the parameters of the model saved with `save`.
    fn load(&mut self, path: &Path) -> Result<()>;
}
