use std::{collections::BTreeMap, fs, path::Path};

use comms::FeatureMap;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result};

/// A single named tensor of an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// The on disk form of a model: a safetensors file holding `F32` tensors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifact {
    tensors: BTreeMap<String, Tensor>,
}

impl Artifact {
    /// Creates an empty `Artifact`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor.
    ///
    /// # Arguments
    /// * `name` - The tensor's name.
    /// * `shape` - Its dimensions, their product must equal `values.len()`.
    /// * `values` - The row major values.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the shape doesn't describe the values.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        values: Vec<f32>,
    ) -> Result<()> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(MlErr::SizeMismatch {
                what: "tensor values",
                got: values.len(),
                expected,
            });
        }

        self.tensors.insert(name.into(), Tensor { shape, values });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Reads an artifact from a safetensors file.
    ///
    /// # Errors
    /// If the file can't be read, isn't valid safetensors or holds a non `F32` tensor.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        let st = SafeTensors::deserialize(&bytes)?;

        let mut artifact = Self::new();
        for (name, view) in st.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(MlErr::UnsupportedDtype {
                    name,
                    dtype: format!("{:?}", view.dtype()),
                });
            }

            let values = bytemuck::pod_collect_to_vec::<u8, f32>(view.data());
            artifact.insert(name, view.shape().to_vec(), values)?;
        }

        Ok(artifact)
    }

    /// Writes this artifact as a safetensors file, replacing the previous contents.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let views = self
            .tensors
            .iter()
            .map(|(name, tensor)| {
                let data = bytemuck::cast_slice(&tensor.values);
                Ok((name.as_str(), TensorView::new(Dtype::F32, tensor.shape.clone(), data)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let bytes = safetensors::serialize(views, &None)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Flattens every tensor into a `FeatureMap`, shapes are dropped.
    pub fn to_feature_map(&self) -> FeatureMap {
        self.tensors
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.values.clone()))
            .collect()
    }
}
