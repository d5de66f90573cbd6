use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::detector::boxes::BBox;
use crate::error::{Result, ResultExt, TrainError};

/// Annotations of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub image: PathBuf,
    /// Original image size; `0` means "read from the file".  Flipped
    /// records need the real width since boxes are mirrored about it.
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub boxes: Vec<BBox>,
    pub gt_classes: Vec<usize>,
    #[serde(default)]
    pub gt_ishard: Vec<bool>,
    #[serde(default)]
    pub dontcare_areas: Vec<BBox>,
    /// Serve the horizontally mirrored image.
    #[serde(default)]
    pub flipped: bool,
}

impl RoiRecord {
    /// Mirror copy; box x-coordinates are reflected about the image width.
    pub fn flipped_copy(&self) -> RoiRecord {
        let w = self.width as f64;
        let mirror = |b: &BBox| [w - b[2] - 1.0, b[1], w - b[0] - 1.0, b[3]];
        RoiRecord {
            boxes: self.boxes.iter().map(mirror).collect(),
            dontcare_areas: self.dontcare_areas.iter().map(mirror).collect(),
            flipped: !self.flipped,
            ..self.clone()
        }
    }
}

/// The region-of-interest database: class names plus per-image records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roidb {
    /// Class names; index 0 is `__background__`.
    pub classes: Vec<String>,
    pub records: Vec<RoiRecord>,
}

impl Roidb {
    pub fn load_json(path: &Path) -> Result<Roidb> {
        let file = std::fs::File::open(path)
            .context(&format!("cannot open roidb '{}'", path.display()))?;
        let mut roidb: Roidb = serde_json::from_reader(std::io::BufReader::new(file))
            .context(&format!("invalid roidb '{}'", path.display()))?;
        roidb.prepare()?;
        Ok(roidb)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Checks record consistency, pads missing hard flags, and drops images
    /// with no objects.
    pub fn prepare(&mut self) -> Result<()> {
        let num_classes = self.classes.len();
        for rec in &mut self.records {
            if rec.boxes.len() != rec.gt_classes.len() {
                return Err(TrainError::Config(format!(
                    "{}: {} boxes but {} classes",
                    rec.image.display(), rec.boxes.len(), rec.gt_classes.len()
                )));
            }
            if let Some(&c) = rec.gt_classes.iter().find(|&&c| c == 0 || c >= num_classes) {
                return Err(TrainError::Config(format!(
                    "{}: class index {} outside 1..{}", rec.image.display(), c, num_classes
                )));
            }
            rec.gt_ishard.resize(rec.boxes.len(), false);
        }
        let before = self.records.len();
        self.records.retain(|r| !r.boxes.is_empty());
        if self.records.len() < before {
            tracing::info!("filtered {} roidb entries without objects", before - self.records.len());
        }
        Ok(())
    }

    /// Appends a mirrored copy of every record.  Records with unknown width
    /// are skipped since their boxes cannot be reflected.
    pub fn append_flipped(&mut self) {
        let flipped: Vec<RoiRecord> = self.records.iter()
            .filter(|r| r.width > 0)
            .map(RoiRecord::flipped_copy)
            .collect();
        self.records.extend(flipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RoiRecord {
        RoiRecord {
            image: PathBuf::from("a.png"),
            width: 100,
            height: 50,
            boxes: vec![[10.0, 5.0, 29.0, 20.0]],
            gt_classes: vec![1],
            gt_ishard: vec![],
            dontcare_areas: vec![],
            flipped: false,
        }
    }

    #[test]
    fn flipping_mirrors_boxes() {
        let f = record().flipped_copy();
        assert!(f.flipped);
        assert_eq!(f.boxes[0], [70.0, 5.0, 89.0, 20.0]);
    }

    #[test]
    fn prepare_pads_hard_flags_and_drops_empty() {
        let mut empty = record();
        empty.boxes.clear();
        empty.gt_classes.clear();
        let mut db = Roidb {
            classes: vec!["__background__".into(), "car".into()],
            records: vec![record(), empty],
        };
        db.prepare().unwrap();
        assert_eq!(db.records.len(), 1);
        assert_eq!(db.records[0].gt_ishard, vec![false]);
        db.append_flipped();
        assert_eq!(db.records.len(), 2);
    }

    #[test]
    fn prepare_rejects_background_labels() {
        let mut bad = record();
        bad.gt_classes = vec![0];
        let mut db = Roidb { classes: vec!["__background__".into(), "car".into()], records: vec![bad] };
        assert!(matches!(db.prepare(), Err(TrainError::Config(_))));
    }

    #[test]
    fn unreadable_roidb_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roidb.json");
        std::fs::write(&path, "{\"classes\": [").unwrap();
        assert!(matches!(Roidb::load_json(&path), Err(TrainError::Config(_))));
        assert!(matches!(Roidb::load_json(&dir.path().join("missing.json")), Err(TrainError::Config(_))));
    }
}
