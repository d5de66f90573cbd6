use std::collections::BTreeSet;

/// Piecewise-constant learning rate: multiplied by `decay` exactly at each
/// configured step.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    current: f64,
    decay_steps: BTreeSet<u64>,
    decay: f64,
}

impl LrSchedule {
    pub fn new(initial: f64, decay_steps: impl IntoIterator<Item = u64>, decay: f64) -> Self {
        LrSchedule { current: initial, decay_steps: decay_steps.into_iter().collect(), decay }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn decay_steps(&self) -> &BTreeSet<u64> {
        &self.decay_steps
    }

    /// Returns the decayed rate when `step` is a decay step.  Steps are
    /// visited once each, so every decay step fires at most once.
    pub fn on_step(&mut self, step: u64) -> Option<f64> {
        if self.decay_steps.contains(&step) {
            self.current *= self.decay;
            Some(self.current)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_only_at_listed_steps() {
        let mut s = LrSchedule::new(0.01, [3], 0.1);
        assert_eq!(s.on_step(2), None);
        let r = s.on_step(3).unwrap();
        assert!((r - 0.001).abs() < 1e-15);
        assert_eq!(s.on_step(4), None);
        assert!((s.current() - 0.001).abs() < 1e-15);
    }

    #[test]
    fn each_decay_step_multiplies_once() {
        let mut s = LrSchedule::new(1.0, [60_000, 80_000, 11_000, 11_000], 0.1);
        assert_eq!(s.decay_steps().len(), 3);
        let mut fired = 0;
        for step in 0..=120_000 {
            let before = s.current();
            if let Some(r) = s.on_step(step) {
                assert!((r - before * 0.1).abs() < 1e-15);
                fired += 1;
            }
        }
        assert_eq!(fired, 3);
        assert!((s.current() - 0.001).abs() < 1e-15);
    }
}
