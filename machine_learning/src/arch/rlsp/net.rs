use std::{cell::RefCell, rc::Rc};

use ndarray::{Array4, ArrayView4};
use rand::Rng;

use super::{CellTrace, RlspCell};
use crate::{
    MlErr, Result,
    arch::{activations::ActFn, ops},
    initialization::{ChainedParamGen, ConstParamGen, Init, ParamGen},
    training::{BackIter, FrontIter},
};

/// Predicts one high resolution frame from a window of low resolution frames, the previous
/// prediction and the hidden state.
#[derive(Debug, Clone)]
pub struct RlspNet {
    cell: RlspCell,
    scale: usize,
    channel: usize,
    depth: usize,
    filters: usize,
}

impl RlspNet {
    /// Creates a new `RlspNet`.
    ///
    /// # Arguments
    /// * `scale` - The up-scaling factor.
    /// * `channel` - The channels of every frame.
    /// * `depth` - The amount of low resolution frames in a window.
    /// * `layers` - The depth of the recurrent cell.
    /// * `filters` - The channels of the hidden state.
    /// * `act_fn` - The activation of the cell.
    pub fn new(
        scale: usize,
        channel: usize,
        depth: usize,
        layers: usize,
        filters: usize,
        act_fn: ActFn,
    ) -> Result<Self> {
        if scale == 0 {
            return Err(MlErr::InvalidHyperparameter {
                name: "scale",
                reason: "must be greater than zero".into(),
            });
        }

        if depth == 0 {
            return Err(MlErr::InvalidHyperparameter {
                name: "clips",
                reason: "a window needs at least one frame".into(),
            });
        }

        let shuffled = channel * scale * scale;
        let in_channels = channel * depth + filters + shuffled;
        let cell = RlspCell::new(in_channels, shuffled, filters, layers, act_fn)?;

        Ok(Self {
            cell,
            scale,
            channel,
            depth,
            filters,
        })
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    /// Returns the amount of parameters of the net.
    pub fn size(&self) -> usize {
        self.cell.size()
    }

    /// The name and shape of every parameter tensor, in the order they are laid out.
    pub fn named_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.cell
            .named_convs()
            .into_iter()
            .flat_map(|(name, conv)| {
                let [weight, bias] = conv.shapes();
                [(format!("{name}.weight"), weight), (format!("{name}.bias"), bias)]
            })
            .collect()
    }

    /// Generates the initial parameters of the net: weights drawn from `init`, zeroed biases.
    pub fn init_params<R: Rng + 'static>(&self, init: Init, rng: Rc<RefCell<R>>) -> Result<Vec<f32>> {
        let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::new();

        for (_, conv) in self.cell.named_convs() {
            let (fan_in, fan_out) = conv.fans();
            let [weight, bias] = conv.shapes();
            let weights = weight.iter().product();

            param_gens.push(init.build(rng.clone(), weights, fan_in, fan_out)?);
            param_gens.push(Box::new(ConstParamGen::zeros(bias.iter().product())));
        }

        let params = ChainedParamGen::new(param_gens).collect_all();
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        Ok(params)
    }

    /// Predicts a single frame.
    ///
    /// # Arguments
    /// * `front` - The parameter iterator, positioned at the first parameter of the net.
    /// * `lr` - The window of `depth` low resolution frames `(B, C, H, W)`.
    /// * `sr` - The previous prediction `(B, C, H·scale, W·scale)`, zeros if `None`.
    /// * `hidden` - The previous hidden state `(B, filters, H, W)`, zeros if `None`.
    ///
    /// # Returns
    /// The prediction and the trace of the cell, which holds the next hidden state.
    pub fn forward(
        &self,
        front: &mut FrontIter<'_>,
        lr: &[ArrayView4<f32>],
        sr: Option<ArrayView4<f32>>,
        hidden: Option<ArrayView4<f32>>,
    ) -> Result<(Array4<f32>, CellTrace)> {
        if lr.len() != self.depth {
            return Err(MlErr::SizeMismatch {
                what: "low resolution window",
                got: lr.len(),
                expected: self.depth,
            });
        }

        let center = lr[self.depth / 2];
        let (b, c, h, w) = center.dim();
        if c != self.channel {
            return Err(MlErr::ShapeMismatch {
                what: "low resolution frame",
                got: center.shape().to_vec(),
                expected: vec![b, self.channel, h, w],
            });
        }

        let s = self.scale;
        let feedback = match sr {
            Some(sr) => ops::space_to_depth(sr, s)?,
            None => Array4::zeros((b, c * s * s, h, w)),
        };

        let zeros;
        let hidden = match hidden {
            Some(hidden) => hidden,
            None => {
                zeros = Array4::zeros((b, self.filters, h, w));
                zeros.view()
            }
        };

        let trace = self.cell.forward(front, lr, feedback.view(), hidden)?;
        let residual = ops::pixel_shuffle(trace.residual(), s)?;
        let out = ops::upsample_nearest(center, s) + residual;

        Ok((out, trace))
    }

    /// Back-propagates through a single prediction.
    ///
    /// # Arguments
    /// * `back` - The reversed parameter iterator, positioned at the last parameter of the net.
    /// * `trace` - The trace returned by the matching `forward` call.
    /// * `d_out` - The derivative of the loss with respect to the prediction.
    /// * `d_next_hidden` - The derivative of the loss with respect to the next hidden state.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the hidden state given to `forward`.
    pub fn backward(
        &self,
        back: &mut BackIter<'_>,
        trace: &CellTrace,
        d_out: ArrayView4<f32>,
        d_next_hidden: Option<ArrayView4<f32>>,
    ) -> Result<Array4<f32>> {
        let d_residual = ops::space_to_depth(d_out, self.scale)?;
        let d_inputs = self
            .cell
            .backward(back, trace, d_residual.view(), d_next_hidden)?;

        let start = self.channel * self.depth;
        Ok(ops::slice_channels(d_inputs.view(), start, start + self.filters).to_owned())
    }
}
