/// Categorical cross-entropy for use with a Softmax output layer.
pub struct CrossEntropyLoss;

/// Keeps log() finite.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// L = -log(predicted[label] + eps) for a single integer label.
    pub fn loss(predicted: &[f64], label: usize) -> f64 {
        -(predicted.get(label).copied().unwrap_or(0.0) + EPS).ln()
    }

    /// Gradient of the combined Softmax + cross-entropy w.r.t. the logits:
    ///   ∂L/∂z_i = predicted[i] - 1{i == label}
    ///
    /// The Softmax activation derivative is 1.0, so this delta passes through
    /// `Layer::compute_gradients()` unchanged.
    pub fn derivative(predicted: &[f64], label: usize) -> Vec<f64> {
        predicted.iter().enumerate()
            .map(|(i, p)| if i == label { p - 1.0 } else { *p })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_is_predicted_minus_one_hot() {
        let d = CrossEntropyLoss::derivative(&[0.2, 0.7, 0.1], 1);
        assert!((d[0] - 0.2).abs() < 1e-12);
        assert!((d[1] + 0.3).abs() < 1e-12);
        assert!((d[2] - 0.1).abs() < 1e-12);
    }
}
