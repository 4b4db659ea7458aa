use ndarray::{
    Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, ArrayView4, ArrayViewMut2, Axis,
    Zip,
};
use rayon::prelude::*;

use crate::{MlErr, Result, arch::activations::ActFn};

/// The values recorded by a forward pass of a `Conv2d`, needed to compute its backward pass.
#[derive(Debug, Clone)]
pub struct ConvTrace {
    x: Array4<f32>,
    z: Array4<f32>,
    a: Option<Array4<f32>>,
}

impl ConvTrace {
    /// The output of the layer, after the activation if there is one.
    pub fn output(&self) -> ArrayView4<'_, f32> {
        self.a.as_ref().unwrap_or(&self.z).view()
    }

    /// Consumes the trace returning the output of the layer.
    pub fn into_output(self) -> Array4<f32> {
        self.a.unwrap_or(self.z)
    }
}

/// A 2D convolution with stride 1 and zero "same" padding, so the spatial size is preserved.
///
/// The parameters are laid out as the weights `(out, in·k·k)` followed by the biases `(out)`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    act_fn: Option<ActFn>,
}

impl Conv2d {
    /// Creates a new `Conv2d`.
    ///
    /// # Arguments
    /// * `in_channels` - The channels of the input feature map.
    /// * `out_channels` - The channels of the output feature map.
    /// * `kernel` - The side of the square kernel, must be odd.
    /// * `act_fn` - The activation applied to the output, if any.
    ///
    /// # Returns
    /// An error if the kernel is even or zero, or if any of the channels is zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        act_fn: Option<ActFn>,
    ) -> Result<Self> {
        if kernel % 2 == 0 {
            return Err(MlErr::InvalidHyperparameter {
                name: "kernel",
                reason: format!("must be odd to keep the spatial size, got {kernel}"),
            });
        }

        if in_channels == 0 || out_channels == 0 {
            return Err(MlErr::InvalidHyperparameter {
                name: "channels",
                reason: format!("must be positive, got {in_channels} -> {out_channels}"),
            });
        }

        Ok(Self {
            in_channels,
            out_channels,
            kernel,
            act_fn,
        })
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weights_size() + self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// The number of input and output units a single weight is connected to.
    pub fn fans(&self) -> (usize, usize) {
        let kk = self.kernel * self.kernel;
        (self.in_channels * kk, self.out_channels * kk)
    }

    /// The shapes of the weights and the biases, as stored in checkpoints.
    pub fn shapes(&self) -> [Vec<usize>; 2] {
        [
            vec![self.out_channels, self.in_channels, self.kernel, self.kernel],
            vec![self.out_channels],
        ]
    }

    fn weights_size(&self) -> usize {
        self.out_channels * self.in_channels * self.kernel * self.kernel
    }

    /// Computes the output of the layer and records the values the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The parameter slice of this layer.
    /// * `x` - The input feature map, `(N, in, H, W)`.
    pub fn forward(&self, params: &[f32], x: ArrayView4<f32>) -> Result<ConvTrace> {
        self.check_input(x)?;
        let (w, b) = self.view_params(params)?;
        let (n, _, h, wd) = x.dim();

        let outputs: Vec<Array2<f32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = self.im2col(x.index_axis(Axis(0), i));
                let mut z = w.dot(&cols);
                z += &b.view().insert_axis(Axis(1));
                z
            })
            .collect();

        let mut z = Array4::zeros((n, self.out_channels, h, wd));
        for (mut zi, out) in z.outer_iter_mut().zip(outputs) {
            zi.assign(&out.into_shape_with_order((self.out_channels, h, wd))?);
        }

        let a = self.act_fn.map(|act_fn| z.mapv(|z| act_fn.f(z)));

        Ok(ConvTrace {
            x: x.to_owned(),
            z,
            a,
        })
    }

    /// Back-propagates `d`, the derivative of the loss with respect to the output of this layer.
    /// The gradient of the parameters is **accumulated** into `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameter slice of this layer.
    /// * `grad` - The gradient slice of this layer.
    /// * `trace` - The trace of the forward pass being differentiated.
    /// * `d` - The derivative of the loss with respect to the output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the input of the layer.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        trace: &ConvTrace,
        d: ArrayView4<f32>,
    ) -> Result<Array4<f32>> {
        if d.dim() != trace.z.dim() {
            return Err(MlErr::ShapeMismatch {
                what: "convolution output derivative",
                got: d.shape().to_vec(),
                expected: trace.z.shape().to_vec(),
            });
        }

        let dz = match self.act_fn {
            Some(act_fn) => Zip::from(d.view())
                .and(trace.z.view())
                .map_collect(|&d, &z| d * act_fn.df(z)),
            None => d.to_owned(),
        };

        let (w, _) = self.view_params(params)?;
        let (n, _, h, wd) = trace.x.dim();

        let partials: Vec<(Array2<f32>, Array3<f32>)> = (0..n)
            .into_par_iter()
            .map(|i| -> Result<(Array2<f32>, Array3<f32>)> {
                let cols = self.im2col(trace.x.index_axis(Axis(0), i));
                let dzi = dz
                    .index_axis(Axis(0), i)
                    .to_shape((self.out_channels, h * wd))?
                    .into_owned();

                let dw = dzi.dot(&cols.t());
                let dcols = w.t().dot(&dzi);
                Ok((dw, self.col2im(dcols.view(), h, wd)))
            })
            .collect::<Result<_>>()?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.weights_size());
        let mut dw = ArrayViewMut2::from_shape((self.out_channels, self.fans().0), dw_raw)?;

        let mut dx = Array4::zeros(trace.x.dim());
        for ((dwi, dxi), mut dx_row) in partials.into_iter().zip(dx.outer_iter_mut()) {
            dw += &dwi;
            dx_row.assign(&dxi);
        }

        let db = dz.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0));
        for (g, d) in db_raw.iter_mut().zip(db.iter()) {
            *g += d;
        }

        Ok(dx)
    }

    /// Unfolds every `k×k` patch of a single `(C, H, W)` feature map into a column of a
    /// `(C·k·k, H·W)` matrix.
    fn im2col(&self, x: ArrayView3<f32>) -> Array2<f32> {
        let (c, h, w) = x.dim();
        let k = self.kernel;
        let pad = (k / 2) as isize;
        let mut cols = Array2::zeros((c * k * k, h * w));

        for ci in 0..c {
            for ky in 0..k {
                for kx in 0..k {
                    let mut row = cols.row_mut((ci * k + ky) * k + kx);
                    let (dy, dx) = (ky as isize - pad, kx as isize - pad);

                    for y in 0..h {
                        let iy = y as isize + dy;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }

                        for xx in 0..w {
                            let ix = xx as isize + dx;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }

                            row[y * w + xx] = x[[ci, iy as usize, ix as usize]];
                        }
                    }
                }
            }
        }

        cols
    }

    /// Folds a `(C·k·k, H·W)` matrix back into a `(C, H, W)` feature map, summing the
    /// overlapping contributions. The adjoint of `im2col`.
    fn col2im(&self, cols: ArrayView2<f32>, h: usize, w: usize) -> Array3<f32> {
        let k = self.kernel;
        let pad = (k / 2) as isize;
        let mut x = Array3::zeros((self.in_channels, h, w));

        for ci in 0..self.in_channels {
            for ky in 0..k {
                for kx in 0..k {
                    let row = cols.row((ci * k + ky) * k + kx);
                    let (dy, dx) = (ky as isize - pad, kx as isize - pad);

                    for y in 0..h {
                        let iy = y as isize + dy;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }

                        for xx in 0..w {
                            let ix = xx as isize + dx;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }

                            x[[ci, iy as usize, ix as usize]] += row[y * w + xx];
                        }
                    }
                }
            }
        }

        x
    }

    fn check_input(&self, x: ArrayView4<f32>) -> Result<()> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::ShapeMismatch {
                what: "convolution input",
                got: vec![n, c, h, w],
                expected: vec![n, self.in_channels, h, w],
            });
        }

        Ok(())
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "convolution parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (w_raw, b_raw) = params.split_at(self.weights_size());
        let weights = ArrayView2::from_shape((self.out_channels, self.fans().0), w_raw)?;
        let biases = ArrayView1::from(b_raw);
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Uniform};

    use super::*;

    fn random(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let uniform = Uniform::new(-1., 1.).unwrap();
        (0..len).map(|_| uniform.sample(&mut rng)).collect()
    }

    fn random4(shape: (usize, usize, usize, usize), seed: u64) -> Array4<f32> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Array::from_shape_vec(shape, random(len, seed)).unwrap()
    }

    /// `sum(conv(x) * r)`, whose derivative with respect to the output is `r`.
    fn weighted_sum(conv: &Conv2d, params: &[f32], x: &Array4<f32>, r: &Array4<f32>) -> f32 {
        let trace = conv.forward(params, x.view()).unwrap();
        (&trace.output() * r).sum()
    }

    #[test]
    fn keeps_the_spatial_size() {
        let conv = Conv2d::new(3, 8, 3, Some(ActFn::relu())).unwrap();
        let params = random(conv.size(), 0);
        let x = random4((2, 3, 5, 7), 1);

        let trace = conv.forward(&params, x.view()).unwrap();
        assert_eq!(trace.output().dim(), (2, 8, 5, 7));
        assert!(trace.output().iter().all(|&a| a >= 0.));
    }

    #[test]
    fn identity_kernel_copies_the_input() {
        let conv = Conv2d::new(1, 1, 3, None).unwrap();
        let mut params = vec![0.; conv.size()];
        params[4] = 1.;
        params[9] = 0.5;

        let x = random4((1, 1, 4, 4), 2);
        let y = conv.forward(&params, x.view()).unwrap().into_output();

        assert_eq!(y, x.mapv(|v| v + 0.5));
    }

    #[test]
    fn wrong_input_channels_fail() {
        let conv = Conv2d::new(2, 2, 3, None).unwrap();
        let params = vec![0.; conv.size()];
        let x = Array4::zeros((1, 3, 2, 2));

        assert!(conv.forward(&params, x.view()).is_err());
        assert!(Conv2d::new(2, 2, 2, None).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let conv = Conv2d::new(2, 3, 3, Some(ActFn::sigmoid(1.))).unwrap();
        let params = random(conv.size(), 3);
        let x = random4((2, 2, 4, 5), 4);
        let r = random4((2, 3, 4, 5), 5);

        let trace = conv.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; conv.size()];
        let dx = conv.backward(&params, &mut grad, &trace, r.view()).unwrap();

        let eps = 1e-2;
        let close = |num: f32, ana: f32| (num - ana).abs() <= 1e-2 * ana.abs().max(1.);

        for idx in [0, 7, 20, conv.size() - 4, conv.size() - 1] {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[idx] += eps;
            minus[idx] -= eps;

            let num = (weighted_sum(&conv, &plus, &x, &r) - weighted_sum(&conv, &minus, &x, &r))
                / (2. * eps);
            assert!(close(num, grad[idx]), "param {idx}: {num} vs {}", grad[idx]);
        }

        for idx in [[0, 0, 0, 0], [1, 1, 2, 3], [0, 1, 3, 4]] {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[idx] += eps;
            minus[idx] -= eps;

            let num = (weighted_sum(&conv, &params, &plus, &r)
                - weighted_sum(&conv, &params, &minus, &r))
                / (2. * eps);
            assert!(close(num, dx[idx]), "input {idx:?}: {num} vs {}", dx[idx]);
        }
    }

    #[test]
    fn gradient_is_accumulated() {
        let conv = Conv2d::new(1, 1, 3, None).unwrap();
        let params = random(conv.size(), 6);
        let x = random4((1, 1, 3, 3), 7);
        let d = Array4::ones((1, 1, 3, 3));

        let trace = conv.forward(&params, x.view()).unwrap();
        let mut once = vec![0.; conv.size()];
        conv.backward(&params, &mut once, &trace, d.view()).unwrap();

        let mut twice = vec![0.; conv.size()];
        conv.backward(&params, &mut twice, &trace, d.view()).unwrap();
        conv.backward(&params, &mut twice, &trace, d.view()).unwrap();

        for (a, b) in once.iter().zip(&twice) {
            assert!((2. * a - b).abs() < 1e-5);
        }
        assert_eq!(once[9], 9.);
    }
}
