use crate::detector::ParamMut;
use crate::math::matrix::Matrix;

/// Hyperparameters an `Sgd` is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Leading parameters left out of the optimized partition.
    pub skip: usize,
}

/// SGD with momentum and L2 weight decay over a fixed parameter partition.
///
/// The learning rate is fixed for the optimizer's lifetime; changing it means
/// building a new `Sgd`, which starts with empty momentum buffers.
pub struct Sgd {
    config: SgdConfig,
    generation: u64,
    velocity: Vec<Matrix>,
}

impl Sgd {
    /// `generation` identifies this build; the trainer increments it on
    /// every rebuild.
    pub fn new(config: SgdConfig, generation: u64) -> Sgd {
        Sgd { config, generation, velocity: Vec::new() }
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether any momentum state has been accumulated yet.
    pub fn has_momentum_state(&self) -> bool {
        !self.velocity.is_empty()
    }

    /// Applies one update: `v = μ·v + (g + λ·w)`, `w -= lr·v`.
    pub fn step(&mut self, params: &mut [ParamMut<'_>]) {
        let SgdConfig { learning_rate, momentum, weight_decay, skip } = self.config;
        if self.velocity.is_empty() {
            self.velocity = params.iter().skip(skip)
                .map(|p| Matrix::zeros(p.value.rows, p.value.cols))
                .collect();
        }

        for (p, v) in params.iter_mut().skip(skip).zip(self.velocity.iter_mut()) {
            let mut update = p.grad.clone();
            if weight_decay != 0.0 {
                update.add_scaled(p.value, weight_decay);
            }
            v.scale_in_place(momentum);
            v.add_scaled(&update, 1.0);
            p.value.add_scaled(v, -learning_rate);
        }
    }
}
