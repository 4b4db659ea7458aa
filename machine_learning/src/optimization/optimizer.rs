use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the accumulated gradients.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Returns the current learning rate.
    fn learning_rate(&self) -> f32;

    /// Overrides the learning rate for this and every following update.
    fn set_learning_rate(&mut self, learning_rate: f32);
}

/// Checks that the gradient and the parameters have the same length.
pub(super) fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(crate::MlErr::SizeMismatch {
            what: "gradient and parameters",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
