mod dense;
mod linear;
mod logistic;

use std::{fmt, str::FromStr};

use ndarray::{Array2, ArrayView2};

pub use dense::{BIAS, Dense, WEIGHT};
pub use linear::Linear;
pub use logistic::Logistic;

use crate::Result;

/// A single dense layer model, trained with plain gradient descent.
pub trait Model {
    fn dense(&self) -> &Dense;

    fn dense_mut(&mut self) -> &mut Dense;

    /// Computes the model's output for a batch.
    ///
    /// # Arguments
    /// * `x` - The batch, one sample per row.
    ///
    /// # Returns
    /// The outputs, shaped `[rows, out]`.
    fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the loss of a batch and its gradient with respect to the parameters.
    ///
    /// # Arguments
    /// * `x` - The batch.
    /// * `y` - The expected outputs.
    /// * `grad` - A buffer for the gradient, as long as the parameters.
    ///
    /// # Returns
    /// The batch loss.
    fn backward(&self, x: ArrayView2<f32>, y: ArrayView2<f32>, grad: &mut [f32]) -> Result<f32>;

    /// Computes the loss of a batch without touching any gradient.
    fn loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32>;

    /// Turns a single output into the label it predicts.
    fn label(&self, output: f32) -> f32 {
        output
    }

    /// Whether outputs are class labels, making accuracy meaningful.
    fn is_classifier(&self) -> bool {
        false
    }
}

/// The closed set of models the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Identity output, mean squared error.
    Linear,
    /// Sigmoid output, binary cross entropy.
    Logistic,
}

impl ModelFamily {
    /// Wraps a layer into the model of this family.
    pub fn build(self, dense: Dense) -> Backend {
        match self {
            ModelFamily::Linear => Backend::Linear(Linear::new(dense)),
            ModelFamily::Logistic => Backend::Logistic(Logistic::new(dense)),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Linear => f.write_str("linear"),
            ModelFamily::Logistic => f.write_str("logistic"),
        }
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ModelFamily::Linear),
            "logistic" => Ok(ModelFamily::Logistic),
            other => Err(format!("unknown model family {other:?}")),
        }
    }
}

/// A model of any family, selected once when the session opens.
#[derive(Debug, Clone)]
pub enum Backend {
    Linear(Linear),
    Logistic(Logistic),
}

impl Backend {
    pub fn family(&self) -> ModelFamily {
        match self {
            Backend::Linear(_) => ModelFamily::Linear,
            Backend::Logistic(_) => ModelFamily::Logistic,
        }
    }
}

impl Model for Backend {
    fn dense(&self) -> &Dense {
        match self {
            Backend::Linear(m) => m.dense(),
            Backend::Logistic(m) => m.dense(),
        }
    }

    fn dense_mut(&mut self) -> &mut Dense {
        match self {
            Backend::Linear(m) => m.dense_mut(),
            Backend::Logistic(m) => m.dense_mut(),
        }
    }

    fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Backend::Linear(m) => m.forward(x),
            Backend::Logistic(m) => m.forward(x),
        }
    }

    fn backward(&self, x: ArrayView2<f32>, y: ArrayView2<f32>, grad: &mut [f32]) -> Result<f32> {
        match self {
            Backend::Linear(m) => m.backward(x, y, grad),
            Backend::Logistic(m) => m.backward(x, y, grad),
        }
    }

    fn loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        match self {
            Backend::Linear(m) => m.loss(x, y),
            Backend::Logistic(m) => m.loss(x, y),
        }
    }

    fn label(&self, output: f32) -> f32 {
        match self {
            Backend::Linear(m) => m.label(output),
            Backend::Logistic(m) => m.label(output),
        }
    }

    fn is_classifier(&self) -> bool {
        match self {
            Backend::Linear(m) => m.is_classifier(),
            Backend::Logistic(m) => m.is_classifier(),
        }
    }
}

/// Checks the labels of a batch line up with the model's outputs.
fn check_labels(dense: &Dense, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<()> {
    let expected = (x.nrows(), dense.dim().1);
    if y.dim() != expected {
        return Err(crate::MlErr::SizeMismatch {
            what: "label columns",
            got: y.ncols(),
            expected: expected.1,
        });
    }

    Ok(())
}
