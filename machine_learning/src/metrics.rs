//! Image fidelity metrics.

use ndarray::{ArrayView, Dimension};

use crate::{
    arch::loss::{LossFn, Mse},
    error::{MlErr, Result},
};

/// The peak value of frames normalized to `[0, 1]`.
pub const MAX_VALUE: f32 = 1.;

/// Peak signal-to-noise ratio between a prediction and its label, in decibels.
///
/// Identical inputs have an infinite PSNR.
///
/// # Errors
/// `MlErr::ShapeMismatch` if the prediction and the label have different shapes.
pub fn psnr<D: Dimension>(y_pred: ArrayView<f32, D>, y: ArrayView<f32, D>) -> Result<f32> {
    psnr_with_max(y_pred, y, MAX_VALUE)
}

/// Like `psnr` but for frames whose peak value is `max_value`.
pub fn psnr_with_max<D: Dimension>(
    y_pred: ArrayView<f32, D>,
    y: ArrayView<f32, D>,
    max_value: f32,
) -> Result<f32> {
    if y_pred.shape() != y.shape() {
        return Err(MlErr::ShapeMismatch {
            what: "psnr prediction",
            got: y_pred.shape().to_vec(),
            expected: y.shape().to_vec(),
        });
    }

    let mse = Mse.loss(y_pred, y);
    Ok(10. * (max_value.powi(2) / mse).log10())
}

/// Mean of a list of values, `NaN` if it's empty.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }

    values.iter().sum::<f32>() / values.len() as f32
}

/// Mean of `(value, weight)` pairs weighted by their weight, `NaN` if the weights add up to 0.
pub fn weighted_mean(values: &[(f32, usize)]) -> f32 {
    let total = values.iter().map(|&(_, w)| w).sum::<usize>();
    if total == 0 {
        return f32::NAN;
    }

    values.iter().map(|&(v, w)| v * w as f32).sum::<f32>() / total as f32
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::*;

    #[test]
    fn psnr_of_a_constant_error() {
        let y = Array4::from_elem((1, 1, 4, 4), 0.5);
        let y_pred = Array4::from_elem((1, 1, 4, 4), 0.6);

        // mse = 0.01 -> 10·log10(100) = 20dB
        assert!((psnr(y_pred.view(), y.view()).unwrap() - 20.).abs() < 1e-3);
        assert!((psnr_with_max(y_pred.view(), y.view(), 255.).unwrap() - 68.13).abs() < 1e-2);
    }

    #[test]
    fn identical_frames_have_infinite_psnr() {
        let y = Array4::from_elem((1, 3, 2, 2), 0.25);
        assert_eq!(psnr(y.view(), y.view()).unwrap(), f32::INFINITY);
    }

    #[test]
    fn mean_of_nothing_is_nan() {
        assert!(mean(&[]).is_nan());
        assert_eq!(mean(&[20., 30.]), 25.);
    }

    #[test]
    fn psnr_of_different_shapes_is_an_error() {
        let y_pred = Array4::<f32>::zeros((1, 1, 2, 2));
        let y = Array4::<f32>::zeros((1, 1, 4, 4));

        let err = psnr(y_pred.view(), y.view());
        assert!(matches!(err, Err(MlErr::ShapeMismatch { .. })));
    }

    #[test]
    fn weighted_mean_counts_every_item() {
        // a batch of 2 clips at 30dB and a batch of 1 clip at 21dB
        assert_eq!(weighted_mean(&[(30., 2), (21., 1)]), 27.);
        assert!(weighted_mean(&[]).is_nan());
    }
}
