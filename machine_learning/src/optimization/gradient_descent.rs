use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        let lr = self.learning_rate;

        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut optimizer = GradientDescent::new(0.5);
        let mut params = [1., -1.];

        optimizer.update_params(&[2., -2.], &mut params).unwrap();
        assert_eq!(params, [0., 0.]);
    }

    #[test]
    fn size_mismatch_fails() {
        let mut optimizer = GradientDescent::new(0.5);
        assert!(optimizer.update_params(&[1.], &mut [1., 2.]).is_err());
    }
}
