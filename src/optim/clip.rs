use crate::detector::ParamMut;

/// Scales every gradient so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_gradient(params: &mut [ParamMut<'_>], max_norm: f64) -> f64 {
    let total_norm = params.iter().map(|p| p.grad.squared_norm()).sum::<f64>().sqrt();
    if total_norm > max_norm {
        let factor = max_norm / total_norm;
        for p in params.iter_mut() {
            p.grad.scale_in_place(factor);
        }
    }
    total_norm
}
