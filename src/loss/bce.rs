/// Binary cross-entropy; scores the RPN objectness output (sigmoid).
pub struct BceLoss;

const EPS: f64 = 1e-12;

impl BceLoss {
    /// Scalar BCE for one prediction: -(y·log(p+ε) + (1-y)·log(1-p+ε))
    pub fn loss(predicted: f64, expected: f64) -> f64 {
        -(expected * (predicted + EPS).ln() + (1.0 - expected) * (1.0 - predicted + EPS).ln())
    }

    /// Gradient w.r.t. the prediction: (p - y) / ((p + ε) · (1 - p + ε))
    pub fn derivative(predicted: f64, expected: f64) -> f64 {
        (predicted - expected) / ((predicted + EPS) * (1.0 - predicted + EPS))
    }
}
