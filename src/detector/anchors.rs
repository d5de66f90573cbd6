use super::boxes::BBox;

/// Square anchors centred on a `grid × grid` lattice over the image, one per
/// entry of `scales` (fractions of the shorter image side).
pub fn generate(width: f64, height: f64, grid: usize, scales: &[f64]) -> Vec<BBox> {
    let short = width.min(height);
    let mut anchors = Vec::with_capacity(grid * grid * scales.len());
    for gy in 0..grid {
        for gx in 0..grid {
            let cx = (gx as f64 + 0.5) * width / grid as f64;
            let cy = (gy as f64 + 0.5) * height / grid as f64;
            for s in scales {
                let half = 0.5 * s * short;
                anchors.push([cx - half, cy - half, cx + half, cy + half]);
            }
        }
    }
    anchors
}
