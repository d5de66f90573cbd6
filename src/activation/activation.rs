use serde::{Serialize, Deserialize};
use std::f64::consts::E;

use crate::math::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFunction {
    Sigmoid,
    ReLU,
    Identity,
    /// Vector-valued; applied row-wise by `apply()`.  Paired with
    /// cross-entropy, whose derivative already folds in the Jacobian.
    Softmax,
}

impl ActivationFunction {
    /// Element-wise activation.  `Softmax` is not element-wise and is only
    /// reachable through `apply()`.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => 1.0 / (1.0 + E.powf(-x)),
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Identity => x,
            ActivationFunction::Softmax => x,
        }
    }

    /// Applies the activation to a pre-activation matrix.
    pub fn apply(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => Matrix::from_data(
                z.data.iter().map(|row| softmax(row)).collect(),
            ),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Element-wise derivative evaluated at the pre-activation `x`.
    ///
    /// `Softmax` returns `1.0`: the combined softmax + cross-entropy gradient
    /// (`predicted - expected`) is passed in as the upstream delta.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            },
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Softmax => 1.0,
        }
    }
}

/// Numerically stable softmax over one row.
fn softmax(row: &[f64]) -> Vec<f64> {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = Matrix::row(vec![1000.0, 1001.0, 999.0]);
        let p = ActivationFunction::Softmax.apply(&z);
        let sum: f64 = p.data[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(p.data[0][1] > p.data[0][0]);
    }

    #[test]
    fn sigmoid_derivative_peaks_at_zero() {
        assert!((ActivationFunction::Sigmoid.derivative(0.0) - 0.25).abs() < 1e-12);
    }
}
