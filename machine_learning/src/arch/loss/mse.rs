use ndarray::{Array, ArrayView, Dimension, Zip};

use super::LossFn;

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss<D: Dimension>(&self, y_pred: ArrayView<f32, D>, y: ArrayView<f32, D>) -> f32 {
        if y_pred.is_empty() {
            return 0.;
        }

        let mut sum = 0.;
        Zip::from(y_pred.view()).and(y.view()).for_each(|&a, &b| sum += (a - b).powi(2));
        sum / y_pred.len() as f32
    }

    fn loss_prime<D: Dimension>(
        &self,
        y_pred: ArrayView<f32, D>,
        y: ArrayView<f32, D>,
    ) -> Array<f32, D> {
        let scale = 2.0 / y_pred.len().max(1) as f32;
        Zip::from(y_pred.view())
            .and(y.view())
            .map_collect(|&a, &b| (a - b) * scale)
    }
}
