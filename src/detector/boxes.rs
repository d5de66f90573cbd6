//! Axis-aligned box helpers in `[x1, y1, x2, y2]` pixel coordinates.

pub type BBox = [f64; 4];

pub fn area(b: &BBox) -> f64 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

pub fn intersection(a: &BBox, b: &BBox) -> f64 {
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    w * h
}

pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let inter = intersection(a, b);
    let denom = area(a) + area(b) - inter;
    if denom <= 0.0 {
        0.0
    } else {
        inter / denom
    }
}

/// Regression targets `(dx, dy, dw, dh)` that move `src` onto `dst`.
pub fn transform(src: &BBox, dst: &BBox) -> [f64; 4] {
    let (sw, sh) = ((src[2] - src[0]).max(1.0), (src[3] - src[1]).max(1.0));
    let (dw, dh) = ((dst[2] - dst[0]).max(1.0), (dst[3] - dst[1]).max(1.0));
    let (scx, scy) = (src[0] + 0.5 * sw, src[1] + 0.5 * sh);
    let (dcx, dcy) = (dst[0] + 0.5 * dw, dst[1] + 0.5 * dh);
    [(dcx - scx) / sw, (dcy - scy) / sh, (dw / sw).ln(), (dh / sh).ln()]
}

/// Inverse of `transform`: applies deltas to `src`.
pub fn apply_deltas(src: &BBox, deltas: &[f64]) -> BBox {
    let (w, h) = ((src[2] - src[0]).max(1.0), (src[3] - src[1]).max(1.0));
    let (cx, cy) = (src[0] + 0.5 * w, src[1] + 0.5 * h);
    // Bound dw/dh so exp() cannot overflow on an untrained head.
    let dw = deltas[2].clamp(-4.0, 4.0);
    let dh = deltas[3].clamp(-4.0, 4.0);
    let (ncx, ncy) = (cx + deltas[0] * w, cy + deltas[1] * h);
    let (nw, nh) = (w * dw.exp(), h * dh.exp());
    [ncx - 0.5 * nw, ncy - 0.5 * nh, ncx + 0.5 * nw, ncy + 0.5 * nh]
}

pub fn clip(b: &BBox, width: f64, height: f64) -> BBox {
    [
        b[0].clamp(0.0, width - 1.0),
        b[1].clamp(0.0, height - 1.0),
        b[2].clamp(0.0, width - 1.0),
        b[3].clamp(0.0, height - 1.0),
    ]
}

/// Greedy non-maximum suppression.  `order` must be sorted by descending
/// score; returns the kept indices in that order.
pub fn nms(boxes: &[BBox], order: &[usize], threshold: f64, limit: usize) -> Vec<usize> {
    let mut keep: Vec<usize> = Vec::new();
    for &i in order {
        if keep.len() >= limit {
            break;
        }
        if keep.iter().all(|&k| iou(&boxes[k], &boxes[i]) <= threshold) {
            keep.push(i);
        }
    }
    keep
}
