use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{Batch, GtBox, ImageBlob, MinibatchProvider};
use crate::error::Result;

/// Generates images of flat-coloured rectangles on a noisy background.
/// Each class has its own fill colour, so a detector can actually learn it.
pub struct SyntheticProvider {
    rng: StdRng,
    width: usize,
    height: usize,
    num_classes: usize,
    max_objects: usize,
    produced: u64,
}

impl SyntheticProvider {
    /// `num_classes` includes background.
    pub fn new(width: usize, height: usize, num_classes: usize, seed: u64) -> SyntheticProvider {
        SyntheticProvider {
            rng: StdRng::seed_from_u64(seed),
            width: width.max(8),
            height: height.max(8),
            num_classes: num_classes.max(2),
            max_objects: 3,
            produced: 0,
        }
    }

    /// Mean-subtracted BGR fill for `class`.
    fn class_colour(class: usize) -> [f32; 3] {
        const PALETTE: [[f32; 3]; 6] = [
            [100.0, -80.0, -80.0],
            [-80.0, 100.0, -80.0],
            [-80.0, -80.0, 100.0],
            [100.0, 100.0, -80.0],
            [-80.0, 100.0, 100.0],
            [100.0, -80.0, 100.0],
        ];
        PALETTE[(class - 1) % PALETTE.len()]
    }
}

impl MinibatchProvider for SyntheticProvider {
    fn next_batch(&mut self) -> Result<Batch> {
        let (w, h) = (self.width, self.height);
        let plane = w * h;
        let mut data: Vec<f32> = (0..3 * plane).map(|_| self.rng.gen_range(-20.0..20.0)).collect();

        let count = self.rng.gen_range(1..=self.max_objects);
        let mut gt_boxes = Vec::with_capacity(count);
        for _ in 0..count {
            let bw = self.rng.gen_range(w / 4..=w / 2);
            let bh = self.rng.gen_range(h / 4..=h / 2);
            let x1 = self.rng.gen_range(0..w - bw);
            let y1 = self.rng.gen_range(0..h - bh);
            let class = self.rng.gen_range(1..self.num_classes);
            let colour = Self::class_colour(class);
            for c in 0..3 {
                for y in y1..y1 + bh {
                    for x in x1..x1 + bw {
                        data[c * plane + y * w + x] = colour[c];
                    }
                }
            }
            gt_boxes.push(GtBox {
                bbox: [x1 as f64, y1 as f64, (x1 + bw - 1) as f64, (y1 + bh - 1) as f64],
                class,
            });
        }

        let name = format!("synthetic_{:06}", self.produced);
        self.produced += 1;
        Ok(Batch {
            image: ImageBlob { channels: 3, height: h, width: w, data },
            im_info: [h as f64, w as f64, 1.0],
            gt_ishard: vec![false; gt_boxes.len()],
            gt_boxes,
            dontcare_areas: Vec::new(),
            im_name: name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_seeded_and_in_bounds() {
        let mut a = SyntheticProvider::new(32, 24, 3, 5);
        let mut b = SyntheticProvider::new(32, 24, 3, 5);
        for _ in 0..10 {
            let x = a.next_batch().unwrap();
            let y = b.next_batch().unwrap();
            assert_eq!(x.gt_boxes, y.gt_boxes);
            assert_eq!(x.image.data.len(), 3 * 32 * 24);
            for g in &x.gt_boxes {
                assert!(g.class >= 1 && g.class < 3);
                assert!(g.bbox[2] < 32.0 && g.bbox[3] < 24.0);
            }
        }
        assert_eq!(a.next_batch().unwrap().im_name, "synthetic_000010");
    }
}
