use ndarray::{Array2, ArrayView2, Zip};

use super::{Dense, Model, check_labels};
use crate::Result;

const EPS: f32 = 1e-7;

/// Logistic regression: sigmoid output and binary cross entropy.
#[derive(Debug, Clone)]
pub struct Logistic {
    dense: Dense,
}

impl Logistic {
    pub fn new(dense: Dense) -> Self {
        Self { dense }
    }

    fn cross_entropy(a: &Array2<f32>, y: ArrayView2<f32>) -> f32 {
        let mut total = 0.0;
        Zip::from(a).and(y).for_each(|&a, &y| {
            let a = a.clamp(EPS, 1.0 - EPS);
            total -= y * a.ln() + (1.0 - y) * (1.0 - a).ln();
        });

        total / a.len().max(1) as f32
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl Model for Logistic {
    fn dense(&self) -> &Dense {
        &self.dense
    }

    fn dense_mut(&mut self) -> &mut Dense {
        &mut self.dense
    }

    fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut z = self.dense.forward(x)?;
        z.mapv_inplace(sigmoid);
        Ok(z)
    }

    // Sigmoid and cross entropy together differentiate to `a - y`.
    fn backward(&self, x: ArrayView2<f32>, y: ArrayView2<f32>, grad: &mut [f32]) -> Result<f32> {
        check_labels(&self.dense, x, y)?;

        let a = self.forward(x)?;
        let loss = Self::cross_entropy(&a, y);

        let d = (a - &y) / y.len().max(1) as f32;
        self.dense.backward(x, d.view(), grad)?;

        Ok(loss)
    }

    fn loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        check_labels(&self.dense, x, y)?;

        let a = self.forward(x)?;
        Ok(Self::cross_entropy(&a, y))
    }

    fn label(&self, output: f32) -> f32 {
        if output >= 0.5 { 1.0 } else { 0.0 }
    }

    fn is_classifier(&self) -> bool {
        true
    }
}
