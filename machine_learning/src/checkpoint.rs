//! Model parameters stored as safetensors, one named `f32` tensor per weight and bias.

use std::{fs, path::Path};

use log::info;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result};

/// Saves the flat parameters of a model split into named tensors.
///
/// # Arguments
/// * `path` - The file to write.
/// * `layout` - The name and shape of every tensor in the order they are laid out in `params`.
/// * `params` - The flat parameters.
pub fn save(path: &Path, layout: &[(String, Vec<usize>)], params: &[f32]) -> Result<()> {
    let expected = layout_size(layout);
    if params.len() != expected {
        return Err(MlErr::SizeMismatch {
            what: "checkpoint parameters",
            got: params.len(),
            expected,
        });
    }

    let mut offset = 0;
    let mut views = Vec::with_capacity(layout.len());
    for (name, shape) in layout {
        let n: usize = shape.iter().product();
        let bytes: &[u8] = bytemuck::cast_slice(&params[offset..offset + n]);
        views.push((name.as_str(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
        offset += n;
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let buf = safetensors::serialize(views, &None)?;
    fs::write(path, buf)?;

    info!(tensors = layout.len(), params = params.len(); "saved checkpoint");
    Ok(())
}

/// Loads the flat parameters saved with `save`.
///
/// The file must hold exactly the tensors of `layout`, with the same shapes.
pub fn load(path: &Path, layout: &[(String, Vec<usize>)]) -> Result<Vec<f32>> {
    let buf = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buf)?;

    if tensors.len() != layout.len() {
        return Err(MlErr::Checkpoint(format!(
            "expected {} tensors, found {}",
            layout.len(),
            tensors.len()
        )));
    }

    let mut params = Vec::with_capacity(layout_size(layout));
    for (name, shape) in layout {
        let tensor = tensors.tensor(name)?;

        if tensor.dtype() != Dtype::F32 {
            return Err(MlErr::Checkpoint(format!(
                "tensor {name} is {:?}, expected F32",
                tensor.dtype()
            )));
        }

        if tensor.shape() != shape.as_slice() {
            return Err(MlErr::ShapeMismatch {
                what: "checkpoint tensor",
                got: tensor.shape().to_vec(),
                expected: shape.clone(),
            });
        }

        params.extend(bytemuck::pod_collect_to_vec::<u8, f32>(tensor.data()));
    }

    info!(tensors = layout.len(), params = params.len(); "loaded checkpoint");
    Ok(params)
}

fn layout_size(layout: &[(String, Vec<usize>)]) -> usize {
    layout
        .iter()
        .map(|(_, shape)| shape.iter().product::<usize>())
        .sum()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("checkpoint-{name}-{}.safetensors", std::process::id()))
    }

    fn layout() -> Vec<(String, Vec<usize>)> {
        vec![
            ("conv.weight".to_string(), vec![2, 1, 1, 3]),
            ("conv.bias".to_string(), vec![2]),
        ]
    }

    #[test]
    fn saved_parameters_are_loaded_back() {
        let path = temp_file("roundtrip");
        let params = [0.5, -1., 2., 3.25, 1e-3, -7., 0.1, 0.2];

        save(&path, &layout(), &params).unwrap();
        assert_eq!(load(&path, &layout()).unwrap(), params);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn parameters_are_loaded_bit_for_bit() {
        let path = temp_file("bits");
        let params = [
            f32::MAX,
            f32::MIN_POSITIVE / 2.,
            -0.,
            f32::NAN,
            f32::INFINITY,
            1. / 3.,
            -1e-30,
            f32::EPSILON,
        ];

        save(&path, &layout(), &params).unwrap();
        let loaded = load(&path, &layout()).unwrap();

        let bits = |values: &[f32]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&loaded), bits(&params));

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn mismatching_layouts_are_rejected() {
        let path = temp_file("mismatch");
        save(&path, &layout(), &[0.; 8]).unwrap();

        let reshaped = vec![
            ("conv.weight".to_string(), vec![3, 1, 1, 2]),
            ("conv.bias".to_string(), vec![2]),
        ];
        assert!(matches!(
            load(&path, &reshaped),
            Err(MlErr::ShapeMismatch { .. })
        ));

        let renamed = vec![
            ("conv.weight".to_string(), vec![2, 1, 1, 3]),
            ("exit.bias".to_string(), vec![2]),
        ];
        assert!(matches!(load(&path, &renamed), Err(MlErr::Checkpoint(_))));

        assert!(save(&path, &layout(), &[0.; 7]).is_err());
        fs::remove_file(path).unwrap();
    }
}
