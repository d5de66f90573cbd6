use rand::Rng;

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Fully connected layer.  Holds its parameters, their accumulated
/// gradients, and the activations of the most recent forward pass.
#[derive(Debug, Clone)]
pub struct Layer{
    pub size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub activator: ActivationFunction,
    pub weights_grad: Matrix,
    pub biases_grad: Matrix,
    neurons: Matrix,
    pre_neurons: Matrix,  // z = xW + b, needed for the derivative
}

impl Layer {
    /// Weights ~ N(0, std_dev²), biases zero.
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        std_dev: f64,
        rng: &mut R,
    ) -> Layer {
        Layer {
            size,
            weights: Matrix::normal(input_size, size, std_dev, rng),
            biases: Matrix::zeros(1, size),
            activator: activation,
            weights_grad: Matrix::zeros(input_size, size),
            biases_grad: Matrix::zeros(1, size),
            neurons: Matrix::zeros(1, size),
            pre_neurons: Matrix::zeros(1, size),
        }
    }

    pub fn feed_from(&mut self, input: &[f64]) -> Vec<f64> {
        let z = &Matrix::row(input.to_vec()) * &self.weights + self.biases.clone();
        let a = self.activator.apply(&z);
        self.pre_neurons = z;
        self.neurons = a.clone();
        a.data.into_iter().next().unwrap_or_default()
    }

    /// Computes gradients for the most recent forward pass.
    /// Returns (weights_grad, biases_grad, input_delta).
    /// `delta` is ∂L/∂a for this layer (error in activation space).
    pub fn compute_gradients(&self, delta: &[f64], input: &[f64]) -> (Matrix, Matrix, Vec<f64>) {
        let act_derivative = self.pre_neurons.map(|x| self.activator.derivative(x));
        // δ = error ⊙ σ'(z)
        let layer_delta = Matrix::row(
            delta.iter().zip(act_derivative.data[0].iter()).map(|(d, s)| d * s).collect(),
        );

        let weights_adjustment = &Matrix::row(input.to_vec()).transpose() * &layer_delta;
        let input_delta = &layer_delta * &self.weights.transpose();

        (weights_adjustment, layer_delta, input_delta.data.into_iter().next().unwrap_or_default())
    }

    /// `[(weights, weights_grad), (biases, biases_grad)]`
    pub fn params_mut(&mut self) -> [(&mut Matrix, &mut Matrix); 2] {
        [
            (&mut self.weights, &mut self.weights_grad),
            (&mut self.biases, &mut self.biases_grad),
        ]
    }

    /// Restores gradient buffers after deserialization (they are not persisted).
    pub fn ensure_grad_buffers(&mut self) {
        if !self.weights_grad.same_shape(&self.weights) {
            self.weights_grad = Matrix::zeros(self.weights.rows, self.weights.cols);
        }
        if !self.biases_grad.same_shape(&self.biases) {
            self.biases_grad = Matrix::zeros(self.biases.rows, self.biases.cols);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut layer = Layer::new(2, 3, ActivationFunction::Sigmoid, 0.5, &mut rng);
        let input = [0.3, -0.2, 0.9];

        // L = sum(a)
        let out = layer.feed_from(&input);
        let base: f64 = out.iter().sum();
        let (w_grad, _, _) = layer.compute_gradients(&[1.0, 1.0], &input);

        let eps = 1e-6;
        layer.weights.data[1][0] += eps;
        let bumped: f64 = layer.feed_from(&input).iter().sum();
        let numeric = (bumped - base) / eps;
        assert!((numeric - w_grad.data[1][0]).abs() < 1e-4);
    }
}
