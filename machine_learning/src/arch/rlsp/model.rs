use std::{cell::RefCell, path::Path, rc::Rc};

use log::{debug, info};
use ndarray::{Array4, ArrayView4, ArrayView5, Axis};
use rand::{SeedableRng, rngs::StdRng};

use super::{CellTrace, RlspNet};
use crate::{
    MlErr, Result, checkpoint,
    arch::{
        EvalMetrics, Losses, SuperResolution,
        activations::ActFn,
        loss::{LossFn, Mse},
    },
    initialization::Init,
    metrics,
    optimization::{Adam, Optimizer},
    summary::SummaryWriter,
    training::ParamManager,
};

pub const DEFAULT_CLIPS: usize = 3;
pub const DEFAULT_LAYERS: usize = 7;
pub const DEFAULT_FILTERS: usize = 64;
pub const DEFAULT_LEARNING_RATE: f32 = 1e-4;

/// The hyperparameters of a `Rlsp` model.
#[derive(Debug, Clone, PartialEq)]
pub struct RlspConfig {
    pub scale: usize,
    pub channel: usize,
    /// The amount of low resolution frames in the window of every prediction.
    pub clips: usize,
    pub layers: usize,
    /// The channels of the hidden state.
    pub filters: usize,
    pub act_fn: ActFn,
    pub init: Init,
    pub learning_rate: f32,
    /// Seeds the initialization, taken from the OS if `None`.
    pub seed: Option<u64>,
}

impl RlspConfig {
    /// Creates the default configuration for the given scale and channels.
    pub fn new(scale: usize, channel: usize) -> Self {
        Self {
            scale,
            channel,
            clips: DEFAULT_CLIPS,
            layers: DEFAULT_LAYERS,
            filters: DEFAULT_FILTERS,
            act_fn: ActFn::relu(),
            init: Init::default(),
            learning_rate: DEFAULT_LEARNING_RATE,
            seed: None,
        }
    }
}

/// Recurrent latent space propagation video super-resolution model.
pub struct Rlsp {
    name: String,
    net: RlspNet,
    params: ParamManager,
    optimizer: Box<dyn Optimizer>,
    loss_fn: Mse,
    writer: Option<Box<dyn SummaryWriter>>,
}

impl Rlsp {
    /// Creates a new `Rlsp` optimized with `Adam`.
    pub fn new(config: RlspConfig) -> Result<Self> {
        let learning_rate = config.learning_rate;
        Self::with_optimizer(config, |len| {
            Box::new(Adam::with_defaults(len, learning_rate))
        })
    }

    /// Creates a new `Rlsp` optimized with the optimizer built by `make_optimizer` for the
    /// amount of parameters of the model. Its learning rate takes precedence over the one of
    /// `config`.
    pub fn with_optimizer<F>(config: RlspConfig, make_optimizer: F) -> Result<Self>
    where
        F: FnOnce(usize) -> Box<dyn Optimizer>,
    {
        let net = RlspNet::new(
            config.scale,
            config.channel,
            config.clips,
            config.layers,
            config.filters,
            config.act_fn,
        )?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let params = net.init_params(config.init, Rc::new(RefCell::new(rng)))?;
        info!(params = params.len(), clips = net.depth(), filters = net.filters(); "built rlsp");

        Ok(Self {
            name: "rlsp".to_string(),
            optimizer: make_optimizer(net.size()),
            net,
            params: ParamManager::new(params),
            loss_fn: Mse::new(),
            writer: None,
        })
    }

    /// Renames the model.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches the writer receiving the images of every evaluation.
    pub fn set_writer(&mut self, writer: Box<dyn SummaryWriter>) {
        self.writer = Some(writer);
    }

    pub fn net(&self) -> &RlspNet {
        &self.net
    }

    pub fn params(&self) -> &[f32] {
        self.params.params()
    }

    /// Overwrites the parameters of the model.
    pub fn load_params(&mut self, params: &[f32]) -> Result<()> {
        self.params.load(params)
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    fn check_labels(&self, inputs: ArrayView5<f32>, labels: ArrayView5<f32>) -> Result<()> {
        let (b, t, c, h, w) = inputs.dim();
        let s = self.net.scale();
        let expected = [b, t, c, h * s, w * s];

        if labels.shape() != expected {
            return Err(MlErr::ShapeMismatch {
                what: "labels",
                got: labels.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        Ok(())
    }

    /// Runs the recurrence over a sequence, calling `on_step` with the index of every predicted
    /// frame, its prediction and the trace of the cell.
    ///
    /// The hidden state is carried from one step to the next and every prediction is fed back
    /// to the following one. Both start as zeros.
    fn unroll<F>(&self, inputs: ArrayView5<f32>, on_step: F) -> Result<()>
    where
        F: FnMut(usize, &Array4<f32>, CellTrace) -> Result<()>,
    {
        self.unroll_with_feedback(inputs, None, on_step)
    }

    /// Same as `unroll`, but when `feedback` is given the `k`-th step is fed `feedback[k - 1]`
    /// instead of its own previous prediction.
    fn unroll_with_feedback<F>(
        &self,
        inputs: ArrayView5<f32>,
        feedback: Option<&[Array4<f32>]>,
        mut on_step: F,
    ) -> Result<()>
    where
        F: FnMut(usize, &Array4<f32>, CellTrace) -> Result<()>,
    {
        let frames: Vec<ArrayView4<f32>> = inputs.axis_iter(Axis(1)).collect();
        let clips = self.net.depth();
        let half = clips / 2;
        let needed = 2 * half + 1;

        if frames.len() < needed {
            return Err(MlErr::NotEnoughFrames {
                got: frames.len(),
                needed,
            });
        }

        let mut hidden: Option<Array4<f32>> = None;
        let mut last_sr: Option<Array4<f32>> = None;

        for (k, i) in (half..frames.len() - half).enumerate() {
            let window = &frames[i - half..i - half + clips];
            let sr_in = match (feedback, k) {
                (_, 0) => None,
                (Some(feedback), k) => feedback.get(k - 1).map(|sr| sr.view()),
                (None, _) => last_sr.as_ref().map(|sr| sr.view()),
            };

            let (sr, trace) = self.net.forward(
                &mut self.params.front(),
                window,
                sr_in,
                hidden.as_ref().map(|h| h.view()),
            )?;

            hidden = Some(trace.next_hidden().to_owned());
            on_step(i, &sr, trace)?;
            last_sr = Some(sr);
        }

        Ok(())
    }

    /// Computes the gradient of the summed loss of a sequence, back-propagating through the
    /// hidden state of every step.
    ///
    /// # Returns
    /// The summed loss.
    fn backprop(&mut self, inputs: ArrayView5<f32>, labels: ArrayView5<f32>) -> Result<f32> {
        let loss_fn = self.loss_fn;
        let mut loss = 0.;
        let mut steps = Vec::new();

        self.unroll(inputs, |i, sr, trace| {
            let label = labels.index_axis(Axis(1), i);
            loss += loss_fn.loss(sr.view(), label);
            steps.push((loss_fn.loss_prime(sr.view(), label), trace));
            Ok(())
        })?;

        self.params.zero_grad();

        let mut d_hidden: Option<Array4<f32>> = None;
        for (d_out, trace) in steps.iter().rev() {
            let mut back = self.params.back();
            let d = self.net.backward(
                &mut back,
                trace,
                d_out.view(),
                d_hidden.as_ref().map(|d| d.view()),
            )?;

            d_hidden = Some(d);
        }

        Ok(loss)
    }
}

impl SuperResolution for Rlsp {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> usize {
        self.net.scale()
    }

    fn channel(&self) -> usize {
        self.net.channel()
    }

    fn size(&self) -> usize {
        self.params.len()
    }

    fn train(
        &mut self,
        inputs: ArrayView5<f32>,
        labels: ArrayView5<f32>,
        learning_rate: Option<f32>,
    ) -> Result<Losses> {
        self.check_labels(inputs, labels)?;

        if let Some(learning_rate) = learning_rate {
            self.optimizer.set_learning_rate(learning_rate);
        }

        let image_loss = self.backprop(inputs, labels)?;
        self.params.optimize(&mut *self.optimizer)?;

        let frames = inputs.len_of(Axis(1)) as f32;
        let losses = Losses {
            total_loss: image_loss / frames,
            image_loss: image_loss / frames,
        };

        debug!(model = self.name.as_str(), image_loss = losses.image_loss; "train step");
        Ok(losses)
    }

    fn eval(
        &mut self,
        inputs: ArrayView5<f32>,
        labels: Option<ArrayView5<f32>>,
        epoch: Option<usize>,
    ) -> Result<(Vec<Array4<f32>>, EvalMetrics)> {
        if let Some(labels) = labels {
            self.check_labels(inputs, labels)?;
        }

        let mut predicts = Vec::new();
        let mut psnrs = Vec::new();
        let mut last = 0;

        self.unroll(inputs, |i, sr, _| {
            if let Some(labels) = labels {
                psnrs.push(metrics::psnr(sr.view(), labels.index_axis(Axis(1), i))?);
            }

            predicts.push(sr.clone());
            last = i;
            Ok(())
        })?;

        let metrics = EvalMetrics {
            psnr: metrics::mean(&psnrs),
        };

        if let (Some(writer), Some(last_sr), Some(step)) =
            (self.writer.as_mut(), predicts.last(), epoch)
        {
            let clean = last_sr.mapv(|v| v.clamp(0., 1.));

            writer.image("clean", clean.view(), step)?;
            if let Some(labels) = labels {
                writer.image("label", labels.index_axis(Axis(1), last), step)?;
            }
        }

        debug!(model = self.name.as_str(), frames = predicts.len(), psnr = metrics.psnr; "eval");
        Ok((predicts, metrics))
    }

    fn save(&self, path: &Path) -> Result<()> {
        checkpoint::save(path, &self.net.named_shapes(), self.params.params())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let params = checkpoint::load(path, &self.net.named_shapes())?;
        self.params.load(&params)
    }
}
