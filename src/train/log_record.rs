use serde::{Serialize, Deserialize};

use crate::detector::LossBreakdown;

/// Accuracy part of a progress record (debug runs only).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyBreakdown {
    /// Percent; `None` when the interval had no foreground samples.
    pub true_positive_pct: Option<f64>,
    /// Percent; `None` when the interval had no background samples.
    pub true_negative_pct: Option<f64>,
    pub fg_per_step: f64,
    pub bg_per_step: f64,
    /// Stage losses of the step that closed the interval.
    pub losses: LossBreakdown,
}

/// One display-interval report.
///
/// When a `progress_tx` channel is configured on the trainer, one record is
/// sent per display interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub step: u64,
    /// Identifier of the batch processed at `step`.
    pub image: String,
    /// Mean loss over the steps of the closed interval.
    pub mean_loss: f64,
    /// Steps per second over the interval.
    pub throughput: f64,
    pub learning_rate: f64,
    pub accuracy: Option<AccuracyBreakdown>,
}

impl LogRecord {
    pub fn summary_line(&self) -> String {
        let fps = self.throughput;
        let per_batch = if fps > 0.0 { 1.0 / fps } else { f64::INFINITY };
        format!(
            "step {}, image: {}, loss: {:.4}, fps: {:.2} ({:.2}s per batch)",
            self.step, self.image, self.mean_loss, fps, per_batch
        )
    }

    /// The two debug lines, when accuracy was collected.
    pub fn accuracy_lines(&self) -> Option<(String, String)> {
        let acc = self.accuracy.as_ref()?;
        let rate = |r: Option<f64>| r.map(|v| format!("{:.2}%", v)).unwrap_or_else(|| "n/a".into());
        let l = &acc.losses;
        Some((
            format!(
                "\tTP: {}, TF: {}, fg/bg=({}/{})",
                rate(acc.true_positive_pct),
                rate(acc.true_negative_pct),
                acc.fg_per_step as i64,
                acc.bg_per_step as i64
            ),
            format!(
                "\trpn_cls: {:.4}, rpn_box: {:.4}, rcnn_cls: {:.4}, rcnn_box: {:.4}",
                l.rpn_cls, l.rpn_box, l.rcnn_cls, l.rcnn_box
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(accuracy: Option<AccuracyBreakdown>) -> LogRecord {
        LogRecord {
            step: 10,
            image: "000005.jpg".into(),
            mean_loss: 1.23461,
            throughput: 4.0,
            learning_rate: 0.001,
            accuracy,
        }
    }

    #[test]
    fn summary_line_format() {
        assert_eq!(
            record(None).summary_line(),
            "step 10, image: 000005.jpg, loss: 1.2346, fps: 4.00 (0.25s per batch)"
        );
        assert!(record(None).accuracy_lines().is_none());
    }

    #[test]
    fn undefined_rates_print_as_na() {
        let acc = AccuracyBreakdown {
            true_positive_pct: None,
            true_negative_pct: Some(87.5),
            fg_per_step: 0.0,
            bg_per_step: 24.6,
            losses: LossBreakdown::default(),
        };
        let (first, second) = record(Some(acc)).accuracy_lines().unwrap();
        assert_eq!(first, "\tTP: n/a, TF: 87.50%, fg/bg=(0/24)");
        assert!(second.starts_with("\trpn_cls: 0.0000"));
    }
}
