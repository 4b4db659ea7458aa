use ndarray::{Array4, ArrayView4};

use super::layers::{Conv2d, ConvTrace};
use crate::{
    MlErr, Result,
    training::{BackIter, FrontIter},
};

/// A sequential stack of convolutions: information flows forward when computing an output and
/// backward when computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Conv2d>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Conv2d>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters in the stack.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Conv2d::size).sum()
    }

    pub fn layers(&self) -> &[Conv2d] {
        &self.layers
    }

    /// Makes a forward pass through the stack, taking each layer's parameters from `front`.
    ///
    /// # Returns
    /// The trace of every layer, the output of the stack being the output of the last one.
    pub fn forward(&self, front: &mut FrontIter<'_>, x: ArrayView4<f32>) -> Result<Vec<ConvTrace>> {
        let mut traces: Vec<ConvTrace> = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let params = front.take_for("sequential layer", layer.size())?;

            let trace = match traces.last() {
                Some(prev) => layer.forward(params, prev.output())?,
                None => layer.forward(params, x)?,
            };

            traces.push(trace);
        }

        Ok(traces)
    }

    /// Back-propagates `d` through the stack, accumulating the gradient of every layer.
    ///
    /// # Arguments
    /// * `back` - The reversed parameter iterator, positioned at the last layer of the stack.
    /// * `traces` - The traces returned by the matching `forward` call.
    /// * `d` - The derivative of the loss with respect to the output of the stack.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the input of the stack.
    pub fn backward(
        &self,
        back: &mut BackIter<'_>,
        traces: &[ConvTrace],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        if traces.len() != self.layers.len() {
            return Err(MlErr::SizeMismatch {
                what: "sequential traces",
                got: traces.len(),
                expected: self.layers.len(),
            });
        }

        let mut d = d;
        for (layer, trace) in self.layers.iter().zip(traces).rev() {
            let (params, grad) = back.take_for("sequential layer", layer.size())?;
            d = layer.backward(params, grad, trace, d.view())?;
        }

        Ok(d)
    }
}
