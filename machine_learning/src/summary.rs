//! Summaries of a training run: images of the predictions and scalar curves.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::{ArrayView3, ArrayView4, Axis};

use crate::{MlErr, Result};

/// Receives the summaries of a model.
pub trait SummaryWriter {
    /// Writes a batch of frames `(B, C, H, W)` with values in `[0, 1]`.
    fn image(&mut self, tag: &str, images: ArrayView4<f32>, step: usize) -> Result<()>;

    /// Writes a single value of a curve.
    fn scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()>;
}

/// Writes the summaries under a directory: grayscale frames as PGM, RGB frames as PPM and every
/// scalar as a row of `scalars.csv`.
#[derive(Debug, Clone)]
pub struct DirWriter {
    dir: PathBuf,
}

const SCALARS_FILE: &str = "scalars.csv";

impl DirWriter {
    /// Creates a new `DirWriter`, creating `dir` if it doesn't exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn encode(frame: ArrayView3<f32>) -> Result<Vec<u8>> {
        let (c, h, w) = frame.dim();
        let magic = match c {
            1 => "P5",
            3 => "P6",
            _ => {
                return Err(MlErr::ShapeMismatch {
                    what: "summary image channels",
                    got: vec![c, h, w],
                    expected: vec![3, h, w],
                });
            }
        };

        let mut bytes = format!("{magic}\n{w} {h}\n255\n").into_bytes();
        // PNM is interleaved, HWC
        let pixels = frame.permuted_axes([1, 2, 0]);
        bytes.extend(
            pixels
                .iter()
                .map(|&v| (v.clamp(0., 1.) * 255.).round() as u8),
        );

        Ok(bytes)
    }
}

impl SummaryWriter for DirWriter {
    fn image(&mut self, tag: &str, images: ArrayView4<f32>, step: usize) -> Result<()> {
        let tag = tag.replace('/', "_");

        for (i, frame) in images.axis_iter(Axis(0)).enumerate() {
            let ext = if frame.len_of(Axis(0)) == 1 { "pgm" } else { "ppm" };
            let path = self.dir.join(format!("{tag}_{step:06}_{i}.{ext}"));

            fs::write(&path, Self::encode(frame)?)?;
            debug!("wrote summary image {}", path.display());
        }

        Ok(())
    }

    fn scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        let path = self.dir.join(SCALARS_FILE);
        let new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if new {
            writeln!(file, "step,tag,value")?;
        }

        writeln!(file, "{step},{tag},{value}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("summary-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn images_are_written_per_batch_item() {
        let dir = temp_dir("images");
        let mut writer = DirWriter::new(&dir).unwrap();

        let rgb = Array4::from_elem((2, 3, 2, 4), 2.);
        writer.image("rlsp/clean", rgb.view(), 3).unwrap();

        let bytes = fs::read(dir.join("rlsp_clean_000003_1.ppm")).unwrap();
        let header = b"P6\n4 2\n255\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(bytes.len(), header.len() + 2 * 4 * 3);
        assert!(bytes[header.len()..].iter().all(|&b| b == 255));

        let gray = Array4::zeros((1, 1, 3, 3));
        writer.image("label", gray.view(), 0).unwrap();
        assert!(dir.join("label_000000_0.pgm").exists());

        let bad = Array4::zeros((1, 2, 3, 3));
        assert!(writer.image("bad", bad.view(), 0).is_err());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn scalars_are_appended() {
        let dir = temp_dir("scalars");
        let mut writer = DirWriter::new(&dir).unwrap();

        writer.scalar("psnr", 21.5, 1).unwrap();
        writer.scalar("psnr", 23., 2).unwrap();

        let csv = fs::read_to_string(dir.join(SCALARS_FILE)).unwrap();
        assert_eq!(csv, "step,tag,value\n1,psnr,21.5\n2,psnr,23\n");

        fs::remove_dir_all(dir).unwrap();
    }
}
