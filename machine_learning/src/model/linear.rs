use ndarray::{Array2, ArrayView2};

use super::{Dense, Model, check_labels};
use crate::Result;

/// Linear regression: identity output and mean squared error.
#[derive(Debug, Clone)]
pub struct Linear {
    dense: Dense,
}

impl Linear {
    pub fn new(dense: Dense) -> Self {
        Self { dense }
    }
}

impl Model for Linear {
    fn dense(&self) -> &Dense {
        &self.dense
    }

    fn dense_mut(&mut self) -> &mut Dense {
        &mut self.dense
    }

    fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.dense.forward(x)
    }

    fn backward(&self, x: ArrayView2<f32>, y: ArrayView2<f32>, grad: &mut [f32]) -> Result<f32> {
        check_labels(&self.dense, x, y)?;

        let diff = self.forward(x)? - &y;
        let loss = diff.mapv(|e| e.powi(2)).mean().unwrap_or_default();

        let d = diff * (2.0 / y.len().max(1) as f32);
        self.dense.backward(x, d.view(), grad)?;

        Ok(loss)
    }

    fn loss(&self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        check_labels(&self.dense, x, y)?;

        let diff = self.forward(x)? - &y;
        Ok(diff.mapv(|e| e.powi(2)).mean().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn perfect_fit_has_no_loss_nor_gradient() {
        let model = Linear::new(Dense::new((1, 1), &[2.0], &[1.0]).unwrap());
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![[1.0], [3.0], [5.0]];
        let mut grad = vec![1.0; 2];

        let loss = model.backward(x.view(), y.view(), &mut grad).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(grad, vec![0.0, 0.0]);
    }

    #[test]
    fn gradient_points_uphill() {
        let model = Linear::new(Dense::zeros((1, 1)));
        let x = array![[1.0], [2.0]];
        let y = array![[2.0], [4.0]];
        let mut grad = vec![0.0; 2];

        let loss = model.backward(x.view(), y.view(), &mut grad).unwrap();
        assert_eq!(loss, 10.0);
        assert!(grad.iter().all(|g| *g < 0.0));
    }
}
