use image::{imageops::FilterType, DynamicImage, GenericImageView};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::{Batch, GtBox, ImageBlob, MinibatchProvider, Roidb, RoiRecord};
use crate::error::{Result, TrainError};
use crate::train::train_config::DataConfig;

/// Serves roidb records one image per batch in a shuffled order, reshuffling
/// every time the permutation is exhausted.
pub struct RoiDataLayer {
    records: Vec<RoiRecord>,
    perm: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    config: DataConfig,
}

impl RoiDataLayer {
    pub fn new(roidb: Roidb, config: DataConfig, seed: u64) -> Result<RoiDataLayer> {
        if roidb.records.is_empty() {
            return Err(TrainError::DataStarvation("roidb has no usable records".into()));
        }
        let mut layer = RoiDataLayer {
            perm: (0..roidb.records.len()).collect(),
            records: roidb.records,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
            config,
        };
        layer.shuffle();
        Ok(layer)
    }

    fn shuffle(&mut self) {
        self.perm.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    fn next_index(&mut self) -> usize {
        if self.cursor >= self.perm.len() {
            self.shuffle();
        }
        let idx = self.perm[self.cursor];
        self.cursor += 1;
        idx
    }

    /// Scale factor that brings the short side to `scale` without the long
    /// side exceeding `max_size`.
    pub fn image_scale(&self, width: u32, height: u32) -> f64 {
        let short = width.min(height).max(1) as f64;
        let long = width.max(height).max(1) as f64;
        let mut scale = self.config.scale as f64 / short;
        if (scale * long).round() > self.config.max_size as f64 {
            scale = self.config.max_size as f64 / long;
        }
        scale
    }

    fn load_blob(&self, record: &RoiRecord) -> Result<(ImageBlob, f64)> {
        let img = image::open(&record.image).map_err(|e| TrainError::Image {
            path: record.image.clone(),
            message: e.to_string(),
        })?;
        let (w, h) = img.dimensions();
        // Flipped boxes were mirrored about the annotated width.
        if (record.width != 0 || record.flipped) && record.width != w {
            return Err(TrainError::Image {
                path: record.image.clone(),
                message: format!("annotated width {} but image is {} pixels wide", record.width, w),
            });
        }
        let img = if record.flipped { img.fliph() } else { img };
        let scale = self.image_scale(w, h);
        let new_w = ((w as f64 * scale).round() as u32).max(1);
        let new_h = ((h as f64 * scale).round() as u32).max(1);
        let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);
        Ok((self.to_blob(&resized), scale))
    }

    /// Converts to a BGR CHW blob and subtracts the configured pixel means.
    fn to_blob(&self, img: &DynamicImage) -> ImageBlob {
        let rgb = img.to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        let mut data = vec![0.0f32; 3 * w * h];
        for (x, y, p) in rgb.enumerate_pixels() {
            let offset = y as usize * w + x as usize;
            for c in 0..3 {
                let bgr = p.0[2 - c] as f64;
                data[c * w * h + offset] = (bgr - self.config.pixel_means[c]) as f32;
            }
        }
        ImageBlob { channels: 3, height: h, width: w, data }
    }
}

impl MinibatchProvider for RoiDataLayer {
    fn next_batch(&mut self) -> Result<Batch> {
        let idx = self.next_index();
        let record = &self.records[idx];
        let (image, scale) = self.load_blob(record)?;
        let scale_box = |b: &[f64; 4]| [b[0] * scale, b[1] * scale, b[2] * scale, b[3] * scale];

        Ok(Batch {
            im_info: [image.height as f64, image.width as f64, scale],
            image,
            gt_boxes: record.boxes.iter().zip(record.gt_classes.iter())
                .map(|(b, &class)| GtBox { bbox: scale_box(b), class })
                .collect(),
            gt_ishard: record.gt_ishard.clone(),
            dontcare_areas: record.dontcare_areas.iter().map(scale_box).collect(),
            im_name: record.image.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| record.image.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> DataConfig {
        DataConfig { scale: 60, max_size: 100, ..DataConfig::default() }
    }

    fn roidb_with(path: PathBuf, w: u32, h: u32) -> Roidb {
        Roidb {
            classes: vec!["__background__".into(), "box".into()],
            records: vec![RoiRecord {
                image: path,
                width: w,
                height: h,
                boxes: vec![[2.0, 2.0, 9.0, 9.0]],
                gt_classes: vec![1],
                gt_ishard: vec![false],
                dontcare_areas: vec![],
                flipped: false,
            }],
        }
    }

    #[test]
    fn empty_roidb_is_data_starvation() {
        let err = RoiDataLayer::new(Roidb::default(), config(), 1).err().unwrap();
        assert!(matches!(err, TrainError::DataStarvation(_)));
    }

    #[test]
    fn scale_respects_max_size() {
        let layer = RoiDataLayer::new(roidb_with("x.png".into(), 20, 10), config(), 1).unwrap();
        assert!((layer.image_scale(20, 10) - 5.0).abs() < 1e-12);
        // short side 60 would make the long side 300 > 100
        assert!((layer.image_scale(50, 10) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn loads_resizes_and_scales_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        image::RgbImage::from_pixel(20, 10, image::Rgb([200, 100, 50]))
            .save(&path)
            .unwrap();

        let mut layer = RoiDataLayer::new(roidb_with(path, 20, 10), config(), 3).unwrap();
        let batch = layer.next_batch().unwrap();
        assert_eq!(batch.im_name, "img.png");
        assert_eq!((batch.image.width, batch.image.height), (100, 50));
        assert_eq!(batch.im_info, [50.0, 100.0, 5.0]);
        assert_eq!(batch.gt_boxes[0].bbox, [10.0, 10.0, 45.0, 45.0]);
        // first plane is blue minus the blue mean
        let expected = (50.0 - DataConfig::default().pixel_means[0]) as f32;
        assert!((batch.image.data[0] - expected).abs() < 1.0);
    }

    #[test]
    fn missing_image_is_an_image_error() {
        let mut layer = RoiDataLayer::new(roidb_with("/nonexistent/x.png".into(), 20, 10), config(), 3).unwrap();
        assert!(matches!(layer.next_batch(), Err(TrainError::Image { .. })));
    }

    #[test]
    fn annotated_width_must_match_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        image::RgbImage::from_pixel(20, 10, image::Rgb([0, 0, 0])).save(&path).unwrap();

        let mut layer = RoiDataLayer::new(roidb_with(path.clone(), 30, 10), config(), 3).unwrap();
        assert!(matches!(layer.next_batch(), Err(TrainError::Image { .. })));

        let mut roidb = roidb_with(path, 0, 0);
        roidb.records[0] = roidb.records[0].flipped_copy();
        let mut layer = RoiDataLayer::new(roidb, config(), 3).unwrap();
        assert!(matches!(layer.next_batch(), Err(TrainError::Image { .. })));
    }

    #[test]
    fn flipped_record_mirrors_boxes_about_image_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        image::RgbImage::from_pixel(20, 10, image::Rgb([0, 0, 0])).save(&path).unwrap();

        let mut roidb = roidb_with(path, 20, 10);
        roidb.records[0] = roidb.records[0].flipped_copy();
        let mut layer = RoiDataLayer::new(roidb, config(), 3).unwrap();
        let batch = layer.next_batch().unwrap();
        // [2, 2, 9, 9] mirrored in a 20-wide image is [10, 2, 17, 9], then scaled by 5.
        assert_eq!(batch.gt_boxes[0].bbox, [50.0, 10.0, 85.0, 45.0]);
    }
}
