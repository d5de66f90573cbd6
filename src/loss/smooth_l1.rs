/// Smooth-L1 (Huber, δ = 1) summed over the four box-regression coordinates.
pub struct SmoothL1Loss;

const DELTA: f64 = 1.0;

impl SmoothL1Loss {
    /// Σ h(predicted − expected)
    /// where h(x) = 0.5·x²  if |x| ≤ δ
    ///              δ·(|x| − 0.5·δ)  otherwise
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| {
                let x = p - y;
                if x.abs() <= DELTA {
                    0.5 * x * x
                } else {
                    DELTA * (x.abs() - 0.5 * DELTA)
                }
            })
            .sum()
    }

    /// Per-coordinate gradient: x  if |x| ≤ δ,  else δ·sign(x)
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| {
                let x = p - y;
                if x.abs() <= DELTA { x } else { DELTA * x.signum() }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_inside_linear_outside() {
        assert!((SmoothL1Loss::loss(&[0.5], &[0.0]) - 0.125).abs() < 1e-12);
        assert!((SmoothL1Loss::loss(&[3.0], &[0.0]) - 2.5).abs() < 1e-12);
        assert_eq!(SmoothL1Loss::derivative(&[3.0, -0.5], &[0.0, 0.0]), vec![1.0, -0.5]);
    }
}
