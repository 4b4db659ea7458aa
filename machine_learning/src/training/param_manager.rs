use std::mem;

use crate::{MlErr, Result, optimization::Optimizer};

/// Manages the parameters of a model and the gradient accumulated for them.
///
/// Layers don't own their parameters, they borrow consecutive slices of a single flat buffer
/// in the order they were built. The parameters can be iterated sequentially in order through
/// the `FrontIter` (forward passes) or in reverse together with their gradient through the
/// `BackIter` (backward passes).
#[derive(Debug, Clone)]
pub struct ParamManager {
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamManager {
    /// Creates a new `ParamManager` with a zeroed gradient.
    ///
    /// # Arguments
    /// * `params` - The initial values of the parameters.
    pub fn new(params: Vec<f32>) -> Self {
        let grad = vec![0.; params.len()];
        Self { params, grad }
    }

    /// Returns the amount of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Sets the whole gradient to zero. Must be called before accumulating a new gradient.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Replaces the parameters with the given ones.
    ///
    /// # Returns
    /// An error if the amount of parameters doesn't match.
    pub fn load(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "loaded parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    /// Takes a step with the optimizer using the accumulated gradient.
    pub fn optimize<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)
    }

    /// Creates a new iterator over the parameters, from the first layer to the last.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter {
            params: &self.params,
        }
    }

    /// Creates a new iterator over the parameters and their gradient, from the last layer to
    /// the first.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            params: &self.params,
            grad: &mut self.grad,
        }
    }
}

/// The parameter iterator used on forward passes.
pub struct FrontIter<'pm> {
    params: &'pm [f32],
}

impl<'pm> FrontIter<'pm> {
    /// Takes the next `n` parameters.
    ///
    /// # Returns
    /// A slice of parameters or `None` if there are less than `n` parameters left.
    pub fn take(&mut self, n: usize) -> Option<&'pm [f32]> {
        if n > self.params.len() {
            return None;
        }

        let (head, tail) = self.params.split_at(n);
        self.params = tail;
        Some(head)
    }

    /// Like `take` but fails with a size mismatch naming the layer that asked for them.
    pub fn take_for(&mut self, what: &'static str, n: usize) -> Result<&'pm [f32]> {
        let left = self.params.len();
        self.take(n).ok_or(MlErr::SizeMismatch {
            what,
            got: left,
            expected: n,
        })
    }

    /// Returns the amount of parameters that were not taken.
    pub fn remaining(&self) -> usize {
        self.params.len()
    }
}

/// The reversed parameter iterator used on backward passes.
pub struct BackIter<'pm> {
    params: &'pm [f32],
    grad: &'pm mut [f32],
}

impl<'pm> BackIter<'pm> {
    /// Takes the last `n` parameters and their gradient.
    ///
    /// # Returns
    /// The parameter and gradient slices or `None` if there are less than `n` parameters left.
    pub fn take(&mut self, n: usize) -> Option<(&'pm [f32], &'pm mut [f32])> {
        let len = self.params.len();
        if n > len {
            return None;
        }

        let (params_head, params_tail) = self.params.split_at(len - n);
        self.params = params_head;

        let grad = mem::take(&mut self.grad);
        let (grad_head, grad_tail) = grad.split_at_mut(len - n);
        self.grad = grad_head;

        Some((params_tail, grad_tail))
    }

    /// Like `take` but fails with a size mismatch naming the layer that asked for them.
    pub fn take_for(
        &mut self,
        what: &'static str,
        n: usize,
    ) -> Result<(&'pm [f32], &'pm mut [f32])> {
        let left = self.params.len();
        self.take(n).ok_or(MlErr::SizeMismatch {
            what,
            got: left,
            expected: n,
        })
    }

    /// Returns the amount of parameters that were not taken.
    pub fn remaining(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::GradientDescent;

    #[test]
    fn front_iterator() {
        let pm = ParamManager::new(vec![1., 2., 3., 4., 5.]);
        let mut front = pm.front();

        assert_eq!(front.take(1).unwrap(), [1.]);
        assert_eq!(front.take(3).unwrap(), [2., 3., 4.]);
        assert!(front.take(2).is_none());
        assert_eq!(front.take(1).unwrap(), [5.]);
        assert_eq!(front.remaining(), 0);
    }

    #[test]
    fn back_iterator_yields_the_layers_in_reverse() {
        let mut pm = ParamManager::new(vec![1., 2., 3., 4., 5.]);
        let mut back = pm.back();

        let (params, grad) = back.take(2).unwrap();
        assert_eq!(params, [4., 5.]);
        grad.fill(1.);

        let (params, grad) = back.take(3).unwrap();
        assert_eq!(params, [1., 2., 3.]);
        grad[0] = 2.;

        assert!(back.take_for("layer", 1).is_err());
        assert_eq!(pm.grad(), [2., 0., 0., 1., 1.]);
    }

    #[test]
    fn optimize_then_zero_grad() {
        let mut pm = ParamManager::new(vec![1., 1.]);
        pm.back().take(2).unwrap().1.copy_from_slice(&[1., -1.]);

        pm.optimize(&mut GradientDescent::new(1.)).unwrap();
        assert_eq!(pm.params(), [0., 2.]);

        pm.zero_grad();
        assert_eq!(pm.grad(), [0., 0.]);
    }

    #[test]
    fn load_checks_the_size() {
        let mut pm = ParamManager::new(vec![0.; 3]);

        assert!(pm.load(&[1., 2.]).is_err());
        pm.load(&[1., 2., 3.]).unwrap();
        assert_eq!(pm.params(), [1., 2., 3.]);
    }
}
