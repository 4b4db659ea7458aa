use ndarray::{Array4, ArrayView4};

use crate::{
    MlErr, Result,
    arch::{
        Sequential,
        activations::ActFn,
        layers::{Conv2d, ConvTrace},
        ops,
    },
    training::{BackIter, FrontIter},
};

const KERNEL: usize = 3;

/// The recurrent cell: a stack of convolutions over the concatenated inputs followed by two
/// heads, one producing the next hidden state and one producing the residual.
#[derive(Debug, Clone)]
pub struct RlspCell {
    cell: Sequential,
    hidden: Conv2d,
    exit: Conv2d,
}

/// The recorded forward pass of a `RlspCell`.
#[derive(Debug, Clone)]
pub struct CellTrace {
    cell: Vec<ConvTrace>,
    hidden: ConvTrace,
    exit: ConvTrace,
}

impl CellTrace {
    pub fn residual(&self) -> ArrayView4<'_, f32> {
        self.exit.output()
    }

    pub fn next_hidden(&self) -> ArrayView4<'_, f32> {
        self.hidden.output()
    }
}

impl RlspCell {
    /// Creates a new `RlspCell`.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the concatenated inputs.
    /// * `out_channels` - The channels of the residual.
    /// * `hidden_channels` - The channels of the hidden state and of every inner feature map.
    /// * `layers` - The depth of the cell, `layers - 1` convolutions before the heads.
    /// * `act_fn` - The activation of every convolution but the residual head.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        hidden_channels: usize,
        layers: usize,
        act_fn: ActFn,
    ) -> Result<Self> {
        if layers == 0 {
            return Err(MlErr::InvalidHyperparameter {
                name: "layers",
                reason: "the cell needs at least one layer".into(),
            });
        }

        let mut cell = vec![Conv2d::new(in_channels, hidden_channels, KERNEL, Some(act_fn))?];
        for _ in 1..layers.saturating_sub(1) {
            cell.push(Conv2d::new(
                hidden_channels,
                hidden_channels,
                KERNEL,
                Some(act_fn),
            )?);
        }

        Ok(Self {
            cell: Sequential::new(cell),
            hidden: Conv2d::new(hidden_channels, hidden_channels, KERNEL, Some(act_fn))?,
            exit: Conv2d::new(hidden_channels, out_channels, KERNEL, None)?,
        })
    }

    /// Returns the amount of parameters of the cell.
    pub fn size(&self) -> usize {
        self.cell.size() + self.hidden.size() + self.exit.size()
    }

    /// Every convolution of the cell with its name, in the order they take their parameters.
    pub fn named_convs(&self) -> Vec<(String, &Conv2d)> {
        let mut convs: Vec<_> = self
            .cell
            .layers()
            .iter()
            .enumerate()
            .map(|(i, conv)| (format!("cell.{i}"), conv))
            .collect();

        convs.push(("hidden".to_string(), &self.hidden));
        convs.push(("exit".to_string(), &self.exit));
        convs
    }

    /// Runs the cell over a window of frames.
    ///
    /// # Arguments
    /// * `front` - The parameter iterator, positioned at the first layer of the cell.
    /// * `lr_frames` - The window of low resolution frames.
    /// * `feedback` - The previous prediction, rearranged to the low resolution size.
    /// * `hidden_state` - The hidden state of the previous step.
    pub fn forward(
        &self,
        front: &mut FrontIter<'_>,
        lr_frames: &[ArrayView4<f32>],
        feedback: ArrayView4<f32>,
        hidden_state: ArrayView4<f32>,
    ) -> Result<CellTrace> {
        let mut inputs: Vec<ArrayView4<f32>> = lr_frames.iter().map(|f| f.view()).collect();
        inputs.push(hidden_state);
        inputs.push(feedback);
        let x = ops::concat_channels(&inputs)?;

        let cell = self.cell.forward(front, x.view())?;
        let features = match cell.last() {
            Some(trace) => trace.output(),
            None => x.view(),
        };

        let params = front.take_for("hidden head", self.hidden.size())?;
        let hidden = self.hidden.forward(params, features)?;

        let params = front.take_for("exit head", self.exit.size())?;
        let exit = self.exit.forward(params, features)?;

        Ok(CellTrace { cell, hidden, exit })
    }

    /// Back-propagates through the cell.
    ///
    /// # Arguments
    /// * `back` - The reversed parameter iterator, positioned at the last layer of the cell.
    /// * `trace` - The trace of the forward pass.
    /// * `d_residual` - The derivative of the loss with respect to the residual.
    /// * `d_next_hidden` - The derivative of the loss with respect to the next hidden state,
    ///   `None` for the last step of a sequence.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the concatenated inputs.
    pub fn backward(
        &self,
        back: &mut BackIter<'_>,
        trace: &CellTrace,
        d_residual: ArrayView4<f32>,
        d_next_hidden: Option<ArrayView4<f32>>,
    ) -> Result<Array4<f32>> {
        let (params, grad) = back.take_for("exit head", self.exit.size())?;
        let mut d = self.exit.backward(params, grad, &trace.exit, d_residual)?;

        let (params, grad) = back.take_for("hidden head", self.hidden.size())?;
        if let Some(d_hidden) = d_next_hidden {
            d += &self.hidden.backward(params, grad, &trace.hidden, d_hidden)?;
        }

        self.cell.backward(back, &trace.cell, d)
    }
}
