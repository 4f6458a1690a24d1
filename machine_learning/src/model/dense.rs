use comms::FeatureMap;
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, linalg};

use crate::{Artifact, MlErr, Result};

/// Name of the weight matrix, shaped `[in, out]`.
pub const WEIGHT: &str = "dense.weight";
/// Name of the bias vector, shaped `[out]`.
pub const BIAS: &str = "dense.bias";

/// A fully connected layer, `z = x·W + b`.
///
/// The parameters live in a single flat buffer, the row major weights first and the biases
/// after them.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    dim: (usize, usize),
    params: Vec<f32>,
}

impl Dense {
    /// Creates a new `Dense` with every parameter set to zero.
    pub fn zeros(dim: (usize, usize)) -> Self {
        Self {
            dim,
            params: vec![0.0; (dim.0 + 1) * dim.1],
        }
    }

    /// Creates a new `Dense` from its weights and biases.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the vectors don't match `dim`.
    pub fn new(dim: (usize, usize), weight: &[f32], bias: &[f32]) -> Result<Self> {
        check_len("weights", weight.len(), dim.0 * dim.1)?;
        check_len("biases", bias.len(), dim.1)?;

        let mut params = Vec::with_capacity(weight.len() + bias.len());
        params.extend_from_slice(weight);
        params.extend_from_slice(bias);

        Ok(Self { dim, params })
    }

    /// Builds the layer out of the `dense.weight` and `dense.bias` tensors of an artifact.
    pub fn from_artifact(artifact: &Artifact) -> Result<Self> {
        let weight = artifact.get(WEIGHT).ok_or(MlErr::MissingTensor(WEIGHT))?;
        let bias = artifact.get(BIAS).ok_or(MlErr::MissingTensor(BIAS))?;

        let &[inputs, outputs] = weight.shape.as_slice() else {
            return Err(MlErr::BadTensorShape {
                name: WEIGHT.to_string(),
                shape: weight.shape.clone(),
            });
        };

        if bias.shape != [outputs] {
            return Err(MlErr::BadTensorShape {
                name: BIAS.to_string(),
                shape: bias.shape.clone(),
            });
        }

        Self::new((inputs, outputs), &weight.values, &bias.values)
    }

    /// The artifact this layer is stored as.
    pub fn to_artifact(&self) -> Result<Artifact> {
        let (weight, bias) = self.params.split_at(self.weight_size());

        let mut artifact = Artifact::new();
        artifact.insert(WEIGHT, vec![self.dim.0, self.dim.1], weight.to_vec())?;
        artifact.insert(BIAS, vec![self.dim.1], bias.to_vec())?;
        Ok(artifact)
    }

    /// The `(inputs, outputs)` dimensions.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// Exports the parameters keyed by tensor name.
    pub fn feature_map(&self) -> FeatureMap {
        let (weight, bias) = self.params.split_at(self.weight_size());

        let mut features = FeatureMap::new();
        features.insert(WEIGHT, weight.to_vec());
        features.insert(BIAS, bias.to_vec());
        features
    }

    /// Overwrites the parameters named in `features`.
    ///
    /// Names this layer doesn't know are skipped. Nothing is written unless every known name
    /// has the right length.
    ///
    /// # Errors
    /// `MlErr::FeatureShape` on the first known name whose length differs.
    pub fn load_feature_map(&mut self, features: &FeatureMap) -> Result<()> {
        let w_size = self.weight_size();
        let b_size = self.dim.1;

        for (name, values) in features.iter() {
            let expected = match name {
                WEIGHT => w_size,
                BIAS => b_size,
                _ => {
                    debug!("ignoring unknown feature {name}");
                    continue;
                }
            };

            if values.len() != expected {
                return Err(MlErr::FeatureShape {
                    name: name.to_string(),
                    got: values.len(),
                    expected,
                });
            }
        }

        let (weight, bias) = self.params.split_at_mut(w_size);
        if let Some(values) = features.get(WEIGHT) {
            weight.copy_from_slice(values);
        }

        if let Some(values) = features.get(BIAS) {
            bias.copy_from_slice(values);
        }

        Ok(())
    }

    /// Computes the pre activations of a batch.
    ///
    /// # Arguments
    /// * `x` - The batch, one sample per row.
    ///
    /// # Returns
    /// `z`, shaped `[rows, out]`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_len("input features", x.ncols(), self.dim.0)?;

        let (w, b) = self.view_params()?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        Ok(z)
    }

    /// Writes the gradient of the loss with respect to this layer's parameters.
    ///
    /// # Arguments
    /// * `x` - The batch that was forwarded.
    /// * `d` - The derivative of the loss with respect to `z`.
    /// * `grad` - A buffer as long as the parameters.
    pub fn backward(&self, x: ArrayView2<f32>, d: ArrayView2<f32>, grad: &mut [f32]) -> Result<()> {
        check_len("gradient buffer", grad.len(), self.size())?;
        check_len("deltas", d.nrows(), x.nrows())?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        Ok(())
    }

    fn weight_size(&self) -> usize {
        self.dim.0 * self.dim.1
    }

    fn view_params(&self) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
        let (w_raw, b_raw) = self.params.split_at(self.weight_size());
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let (dw_raw, db_raw) = grad.split_at_mut(self.weight_size());
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }
}

fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn layer() -> Dense {
        Dense::new((2, 1), &[1.0, -1.0], &[0.5]).unwrap()
    }

    #[test]
    fn forward_applies_weights_and_bias() {
        let x = array![[1.0, 2.0], [3.0, 1.0]];
        let z = layer().forward(x.view()).unwrap();
        assert_eq!(z, array![[-0.5], [2.5]]);
    }

    #[test]
    fn forward_rejects_wrong_width() {
        let x = array![[1.0, 2.0, 3.0]];
        assert!(layer().forward(x.view()).is_err());
    }

    #[test]
    fn backward_sums_bias_deltas() {
        let dense = layer();
        let x = array![[1.0, 2.0], [3.0, 1.0]];
        let d = array![[1.0], [2.0]];
        let mut grad = vec![0.0; dense.size()];

        dense.backward(x.view(), d.view(), &mut grad).unwrap();
        assert_eq!(grad, vec![7.0, 4.0, 3.0]);
    }

    #[test]
    fn load_feature_map_skips_unknown_names() {
        let mut dense = layer();
        let mut features = FeatureMap::new();
        features.insert(BIAS, vec![9.0]);
        features.insert("embedding.weight", vec![1.0; 10]);

        dense.load_feature_map(&features).unwrap();
        assert_eq!(dense.params(), &[1.0, -1.0, 9.0]);
    }

    #[test]
    fn load_feature_map_rejects_wrong_length_untouched() {
        let mut dense = layer();
        let mut features = FeatureMap::new();
        features.insert(BIAS, vec![9.0]);
        features.insert(WEIGHT, vec![1.0; 3]);

        let err = dense.load_feature_map(&features).unwrap_err();
        assert!(matches!(err, MlErr::FeatureShape { got: 3, expected: 2, .. }));
        assert_eq!(dense, layer());
    }

    #[test]
    fn artifact_conversion_keeps_the_layer() {
        let dense = layer();
        let artifact = dense.to_artifact().unwrap();
        assert_eq!(Dense::from_artifact(&artifact).unwrap(), dense);
    }
}
