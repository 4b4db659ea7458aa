//! Parameter-free tensor operations over NCHW feature maps.

use ndarray::{Array4, ArrayView4, Axis, concatenate, s};

use crate::{MlErr, Result};

/// Rearranges `(N, C·r², H, W)` into `(N, C, H·r, W·r)`.
///
/// Output pixel `(h·r + i, w·r + j)` of channel `c` comes from channel `c·r² + i·r + j`.
pub fn pixel_shuffle(x: ArrayView4<f32>, r: usize) -> Result<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    let rr = r * r;

    if r == 0 || c % rr != 0 {
        return Err(MlErr::ShapeMismatch {
            what: "pixel shuffle channels",
            got: vec![n, c, h, w],
            expected: vec![n, (c / rr.max(1)).max(1) * rr, h, w],
        });
    }

    let oc = c / rr;
    let shuffled = x
        .to_shape((n, oc, r, r, h, w))?
        .permuted_axes([0, 1, 4, 2, 5, 3]);

    Ok(shuffled
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, oc, h * r, w * r))?)
}

/// Rearranges `(N, C, H·r, W·r)` into `(N, C·r², H, W)`, the exact inverse of
/// `pixel_shuffle`. It's also the gradient of `pixel_shuffle`.
pub fn space_to_depth(x: ArrayView4<f32>, r: usize) -> Result<Array4<f32>> {
    let (n, c, h, w) = x.dim();

    if r == 0 || h % r != 0 || w % r != 0 {
        return Err(MlErr::ShapeMismatch {
            what: "space to depth spatial size",
            got: vec![n, c, h, w],
            expected: vec![n, c, h / r.max(1) * r, w / r.max(1) * r],
        });
    }

    let (oh, ow) = (h / r, w / r);
    let blocks = x
        .to_shape((n, c, oh, r, ow, r))?
        .permuted_axes([0, 1, 3, 5, 2, 4]);

    Ok(blocks
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n, c * r * r, oh, ow))?)
}

/// Nearest-neighbour up-scaling by an integer factor.
pub fn upsample_nearest(x: ArrayView4<f32>, r: usize) -> Array4<f32> {
    let (n, c, h, w) = x.dim();

    Array4::from_shape_fn((n, c, h * r, w * r), |(b, ch, y, xx)| {
        x[[b, ch, y / r, xx / r]]
    })
}

/// Box-filter down-scaling by an integer factor: every output pixel is the mean of an
/// `r×r` block.
pub fn downsample_mean(x: ArrayView4<f32>, r: usize) -> Result<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    let blocks = space_to_depth(x, r)?;

    let means = blocks
        .into_shape_with_order((n, c, r * r, h / r, w / r))?
        .mean_axis(Axis(2))
        .ok_or(MlErr::InvalidHyperparameter {
            name: "scale",
            reason: "must be greater than zero".into(),
        })?;

    Ok(means)
}

/// Concatenates feature maps on the channel axis.
pub fn concat_channels(xs: &[ArrayView4<f32>]) -> Result<Array4<f32>> {
    let Some(first) = xs.first() else {
        return Err(MlErr::SizeMismatch {
            what: "concatenated feature maps",
            got: 0,
            expected: 1,
        });
    };

    let (n, _, h, w) = first.dim();
    for x in xs {
        let (xn, xc, xh, xw) = x.dim();
        if (xn, xh, xw) != (n, h, w) {
            return Err(MlErr::ShapeMismatch {
                what: "concatenated feature maps",
                got: vec![xn, xc, xh, xw],
                expected: vec![n, xc, h, w],
            });
        }
    }

    Ok(concatenate(Axis(1), xs)?)
}

/// Returns the channels `start..end` of a feature map.
pub fn slice_channels(x: ArrayView4<'_, f32>, start: usize, end: usize) -> ArrayView4<'_, f32> {
    x.slice_move(s![.., start..end, .., ..])
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Array4, array};

    use super::*;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Array::range(0., len as f32, 1.)
            .into_shape_with_order(shape)
            .unwrap()
    }

    #[test]
    fn pixel_shuffle_interleaves_channels() {
        let x = ramp((1, 4, 1, 1));
        let y = pixel_shuffle(x.view(), 2).unwrap();

        assert_eq!(y, array![[[[0., 1.], [2., 3.]]]]);
    }

    #[test]
    fn pixel_shuffle_scales_the_shape() {
        let x = ramp((2, 3 * 16, 5, 7));
        let y = pixel_shuffle(x.view(), 4).unwrap();

        assert_eq!(y.dim(), (2, 3, 20, 28));
        assert_eq!(y[[1, 2, 19, 27]], x[[1, 2 * 16 + 3 * 4 + 3, 4, 6]]);
    }

    #[test]
    fn space_to_depth_inverts_pixel_shuffle() {
        let x = ramp((2, 12, 3, 4));
        let y = pixel_shuffle(x.view(), 2).unwrap();

        assert_eq!(space_to_depth(y.view(), 2).unwrap(), x);
    }

    #[test]
    fn shape_errors_are_reported() {
        let x = ramp((1, 3, 4, 4));

        assert!(pixel_shuffle(x.view(), 2).is_err());
        assert!(space_to_depth(x.view(), 3).is_err());
    }

    #[test]
    fn upsample_then_downsample_is_identity() {
        let x = ramp((1, 2, 3, 3));
        let up = upsample_nearest(x.view(), 3);

        assert_eq!(up.dim(), (1, 2, 9, 9));
        assert_eq!(up[[0, 1, 8, 0]], x[[0, 1, 2, 0]]);
        assert_eq!(downsample_mean(up.view(), 3).unwrap(), x);
    }

    #[test]
    fn concat_then_slice() {
        let a = Array4::from_elem((1, 2, 2, 2), 1.);
        let b = Array4::from_elem((1, 3, 2, 2), 2.);

        let cat = concat_channels(&[a.view(), b.view()]).unwrap();
        assert_eq!(cat.dim(), (1, 5, 2, 2));
        assert_eq!(slice_channels(cat.view(), 2, 5), b);

        let c = Array4::from_elem((1, 1, 3, 3), 0.);
        assert!(concat_channels(&[a.view(), c.view()]).is_err());
    }
}
