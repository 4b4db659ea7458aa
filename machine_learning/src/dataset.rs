use std::{fs, path::Path};

use log::info;
use ndarray::{Array3, Array5, ArrayView5, Axis, s};
use ndarray_rand::RandomExt;
use rand::{Rng, seq::SliceRandom};
use rand_distr::Uniform;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result, arch::ops, initialization::RandErr};

/// Paired low and high resolution clips.
///
/// The low resolution clips are `(N, T, C, h, w)` and the high resolution ones
/// `(N, T, C, h·scale, w·scale)`.
#[derive(Debug, Clone)]
pub struct Dataset {
    lr: Array5<f32>,
    hr: Array5<f32>,
    scale: usize,
}

impl Dataset {
    /// Creates a new `Dataset` from already paired clips.
    ///
    /// # Returns
    /// A shape mismatch if the clips don't pair up under a single integer scale.
    pub fn new(lr: Array5<f32>, hr: Array5<f32>) -> Result<Self> {
        let (n, t, c, h, w) = lr.dim();
        let (hn, ht, hc, hh, hw) = hr.dim();

        let scale = if h > 0 { hh / h } else { 0 };
        if (hn, ht, hc) != (n, t, c) || scale == 0 || (hh, hw) != (h * scale, w * scale) {
            return Err(MlErr::ShapeMismatch {
                what: "dataset high resolution clips",
                got: hr.shape().to_vec(),
                expected: vec![n, t, c, h * scale.max(1), w * scale.max(1)],
            });
        }

        Ok(Self { lr, hr, scale })
    }

    /// Pairs high resolution clips with their box down-scaled version.
    pub fn from_hr(hr: Array5<f32>, scale: usize) -> Result<Self> {
        let (n, t, c, h, w) = hr.dim();
        let frames = hr.to_shape((n * t, c, h, w))?;

        let lr = ops::downsample_mean(frames.view(), scale)?
            .into_shape_with_order((n, t, c, h / scale, w / scale))?;

        Self::new(lr, hr)
    }

    /// Generates clips of random textures sliding across the frame at a constant speed.
    ///
    /// # Arguments
    /// * `rng` - The random number generator.
    /// * `clips` - The amount of clips.
    /// * `frames` - The frames of every clip.
    /// * `channel` - The channels of every frame.
    /// * `size` - The `(height, width)` of the high resolution frames.
    /// * `scale` - The down-scaling factor of the low resolution frames.
    pub fn synthetic<R: Rng>(
        rng: &mut R,
        clips: usize,
        frames: usize,
        channel: usize,
        size: (usize, usize),
        scale: usize,
    ) -> Result<Self> {
        const MAX_SPEED: usize = 2;
        const GRAIN: usize = 2;

        let (height, width) = size;
        let margin = MAX_SPEED * frames;
        let texture_size = (
            (height + margin).div_ceil(GRAIN),
            (width + margin).div_ceil(GRAIN),
        );

        let pixels = Uniform::new(0f32, 1.).map_err(RandErr::from)?;
        let mut hr = Array5::zeros((clips, frames, channel, height, width));

        for mut clip in hr.outer_iter_mut() {
            let coarse = Array3::random_using(
                (channel, texture_size.0, texture_size.1),
                pixels,
                &mut *rng,
            );
            let coarse = coarse.insert_axis(Axis(0));
            let texture = ops::upsample_nearest(coarse.view(), GRAIN);

            let vy = rng.random_range(0..=MAX_SPEED);
            let vx = rng.random_range(0..=MAX_SPEED);

            for (t, mut frame) in clip.outer_iter_mut().enumerate() {
                let (y, x) = (vy * t, vx * t);
                frame.assign(&texture.slice(s![0, .., y..y + height, x..x + width]));
            }
        }

        Self::from_hr(hr, scale)
    }

    /// Loads the `lr` and `hr` `f32` tensors of a safetensors file.
    pub fn from_safetensors(path: &Path) -> Result<Self> {
        let buf = fs::read(path)?;
        let tensors = SafeTensors::deserialize(&buf)?;

        let dataset = Self::new(read_clips(&tensors, "lr")?, read_clips(&tensors, "hr")?)?;
        info!(clips = dataset.len(), scale = dataset.scale; "loaded dataset");

        Ok(dataset)
    }

    /// Saves the clips in the format read by `from_safetensors`.
    pub fn save_safetensors(&self, path: &Path) -> Result<()> {
        let lr = self.lr.as_standard_layout();
        let hr = self.hr.as_standard_layout();

        let mut views = Vec::with_capacity(2);
        for (name, clips) in [("lr", &lr), ("hr", &hr)] {
            let data = clips.as_slice().ok_or(MlErr::Checkpoint(format!(
                "{name} clips are not contiguous"
            )))?;
            let bytes: &[u8] = bytemuck::cast_slice(data);
            views.push((name, TensorView::new(Dtype::F32, clips.shape().to_vec(), bytes)?));
        }

        fs::write(path, safetensors::serialize(views, &None)?)?;
        Ok(())
    }

    /// Returns the amount of clips.
    pub fn len(&self) -> usize {
        self.lr.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the frames of every clip.
    pub fn frames(&self) -> usize {
        self.lr.len_of(Axis(1))
    }

    pub fn channel(&self) -> usize {
        self.lr.len_of(Axis(2))
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn lr(&self) -> ArrayView5<'_, f32> {
        self.lr.view()
    }

    pub fn hr(&self) -> ArrayView5<'_, f32> {
        self.hr.view()
    }

    /// Shuffles the order of the clips.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        self.lr = self.lr.select(Axis(0), &order);
        self.hr = self.hr.select(Axis(0), &order);
    }

    /// Splits off the last `n` clips into a new dataset.
    pub fn split_off(&mut self, n: usize) -> Self {
        let at = self.len().saturating_sub(n);

        let tail = Self {
            lr: self.lr.slice(s![at.., .., .., .., ..]).to_owned(),
            hr: self.hr.slice(s![at.., .., .., .., ..]).to_owned(),
            scale: self.scale,
        };

        self.lr = self.lr.slice(s![..at, .., .., .., ..]).to_owned();
        self.hr = self.hr.slice(s![..at, .., .., .., ..]).to_owned();
        tail
    }

    /// Iterates the clips in batches of `batch_size`, the last one possibly smaller.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView5<'_, f32>, ArrayView5<'_, f32>)> {
        let batch_size = batch_size.max(1);

        self.lr
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.hr.axis_chunks_iter(Axis(0), batch_size))
    }
}

fn read_clips(tensors: &SafeTensors<'_>, name: &str) -> Result<Array5<f32>> {
    let tensor = tensors.tensor(name)?;

    if tensor.dtype() != Dtype::F32 {
        return Err(MlErr::Checkpoint(format!(
            "dataset tensor {name} is {:?}, expected F32",
            tensor.dtype()
        )));
    }

    let &[n, t, c, h, w] = tensor.shape() else {
        return Err(MlErr::ShapeMismatch {
            what: "dataset tensor rank",
            got: tensor.shape().to_vec(),
            expected: vec![0; 5],
        });
    };

    let data = bytemuck::pod_collect_to_vec::<u8, f32>(tensor.data());

    Ok(Array5::from_shape_vec((n, t, c, h, w), data)?)
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn synthetic_clips_are_paired() {
        let mut rng = StdRng::seed_from_u64(42);
        let dataset = Dataset::synthetic(&mut rng, 5, 4, 3, (8, 12), 2).unwrap();

        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.frames(), 4);
        assert_eq!(dataset.lr().dim(), (5, 4, 3, 4, 6));
        assert_eq!(dataset.hr().dim(), (5, 4, 3, 8, 12));
        assert!(dataset.hr().iter().all(|v| (0. ..1.).contains(v)));

        let hr = dataset.hr();
        let expected = hr.slice(s![0, 1, 2, 0..2, 0..2]).mean().unwrap();
        assert!((dataset.lr()[[0, 1, 2, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn unpaired_clips_are_rejected() {
        let lr = Array5::zeros((2, 3, 1, 4, 4));
        assert!(Dataset::new(lr.clone(), Array5::zeros((2, 3, 1, 8, 6))).is_err());
        assert!(Dataset::new(lr.clone(), Array5::zeros((1, 3, 1, 8, 8))).is_err());
        assert_eq!(
            Dataset::new(lr, Array5::zeros((2, 3, 1, 12, 12)))
                .unwrap()
                .scale(),
            3
        );
    }

    #[test]
    fn shuffle_keeps_clips_paired() {
        let hr = Array::range(0., 6., 1.)
            .into_shape_with_order((6, 1, 1, 1, 1))
            .unwrap()
            .broadcast((6, 2, 1, 2, 2))
            .unwrap()
            .to_owned();
        let mut dataset = Dataset::from_hr(hr, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        dataset.shuffle(&mut rng);

        for i in 0..dataset.len() {
            assert_eq!(dataset.lr()[[i, 1, 0, 0, 0]], dataset.hr()[[i, 0, 0, 1, 1]]);
        }
    }

    #[test]
    fn batches_and_split() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut dataset = Dataset::synthetic(&mut rng, 7, 3, 1, (4, 4), 2).unwrap();

        let full = dataset.clone();

        let eval = dataset.split_off(2);
        assert_eq!((dataset.len(), eval.len()), (5, 2));
        assert_eq!(eval.hr(), full.hr().slice(s![5.., .., .., .., ..]));
        assert_eq!(dataset.lr(), full.lr().slice(s![..5, .., .., .., ..]));

        let sizes: Vec<_> = dataset.batches(2).map(|(lr, _)| lr.len_of(Axis(0))).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn safetensors_roundtrip() {
        let mut rng = StdRng::seed_from_u64(9);
        let dataset = Dataset::synthetic(&mut rng, 2, 3, 3, (6, 6), 3).unwrap();
        let path = std::env::temp_dir().join(format!("dataset-{}.safetensors", std::process::id()));

        dataset.save_safetensors(&path).unwrap();
        let loaded = Dataset::from_safetensors(&path).unwrap();

        assert_eq!(loaded.lr(), dataset.lr());
        assert_eq!(loaded.hr(), dataset.hr());
        assert_eq!(loaded.scale(), 3);

        fs::remove_file(path).unwrap();
    }
}
