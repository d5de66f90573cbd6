//! Fixed (parameter-free) region pooling.

use super::boxes::BBox;
use crate::data::ImageBlob;

/// Cells per side of the pooling grid.
pub const POOL_GRID: usize = 2;

/// Length of the descriptor produced by `region_features` for a 3-channel image.
pub const FEATURE_LEN: usize = POOL_GRID * POOL_GRID * 3 + 4;

/// Mean-subtracted pixels are roughly in [-128, 128].
const PIXEL_SCALE: f64 = 1.0 / 128.0;

/// Describes `region` by the mean of each channel over a `POOL_GRID²` grid of
/// cells, followed by the region's normalized centre and size.
pub fn region_features(image: &ImageBlob, region: &BBox) -> Vec<f64> {
    let (w, h) = (image.width as f64, image.height as f64);
    let mut features = Vec::with_capacity(FEATURE_LEN);

    let region = if region.iter().all(|v| v.is_finite()) { *region } else { [0.0, 0.0, w, h] };
    let x1 = region[0].clamp(0.0, w - 1.0);
    let y1 = region[1].clamp(0.0, h - 1.0);
    let x2 = region[2].clamp(x1 + 1.0, w);
    let y2 = region[3].clamp(y1 + 1.0, h);
    let cell_w = (x2 - x1) / POOL_GRID as f64;
    let cell_h = (y2 - y1) / POOL_GRID as f64;

    for c in 0..image.channels.min(3) {
        for gy in 0..POOL_GRID {
            for gx in 0..POOL_GRID {
                let cx1 = (x1 + gx as f64 * cell_w).floor() as usize;
                let cy1 = (y1 + gy as f64 * cell_h).floor() as usize;
                let cx2 = ((x1 + (gx + 1) as f64 * cell_w).ceil() as usize).clamp(cx1 + 1, image.width);
                let cy2 = ((y1 + (gy + 1) as f64 * cell_h).ceil() as usize).clamp(cy1 + 1, image.height);
                features.push(cell_mean(image, c, cx1, cy1, cx2, cy2) * PIXEL_SCALE);
            }
        }
    }
    features.resize(POOL_GRID * POOL_GRID * 3, 0.0);

    features.push((x1 + x2) * 0.5 / w);
    features.push((y1 + y2) * 0.5 / h);
    features.push((x2 - x1) / w);
    features.push((y2 - y1) / h);
    features
}

fn cell_mean(image: &ImageBlob, channel: usize, x1: usize, y1: usize, x2: usize, y2: usize) -> f64 {
    let plane = channel * image.height * image.width;
    let mut sum = 0.0;
    let mut n = 0usize;
    for y in y1..y2.min(image.height) {
        let row = plane + y * image.width;
        for x in x1..x2.min(image.width) {
            sum += image.data[row + x] as f64;
            n += 1;
        }
    }
    if n == 0 { 0.0 } else { sum / n as f64 }
}
