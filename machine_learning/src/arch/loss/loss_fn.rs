use ndarray::{Array, ArrayView, Dimension};

pub trait LossFn {
    /// Returns the loss of a prediction.
    fn loss<D: Dimension>(&self, y_pred: ArrayView<f32, D>, y: ArrayView<f32, D>) -> f32;

    /// Returns the derivative of the loss with respect to every element of the prediction.
    fn loss_prime<D: Dimension>(&self, y_pred: ArrayView<f32, D>, y: ArrayView<f32, D>)
    -> Array<f32, D>;
}
