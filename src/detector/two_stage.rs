use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use super::{
    anchors,
    boxes::{self, BBox},
    pooling::{self, FEATURE_LEN},
    DebugCounters, Detector, DetectorOutput, LossBreakdown, ParamMut, StateDict,
};
use crate::activation::activation::ActivationFunction;
use crate::data::Batch;
use crate::error::{Result, TrainError};
use crate::layers::dense::Layer;
use crate::loss::{BceLoss, CrossEntropyLoss, SmoothL1Loss};
use crate::math::matrix::Matrix;
use crate::train::train_config::DetectorConfig;

const BACKBONE: usize = 0;
const RPN_CLS: usize = 1;
const RPN_BOX: usize = 2;
const RCNN_FC: usize = 3;
const RCNN_CLS: usize = 4;
const RCNN_BOX: usize = 5;

const LAYER_NAMES: [&str; 6] = [
    "backbone.fc",
    "rpn.cls_score",
    "rpn.bbox_pred",
    "rcnn.fc",
    "rcnn.cls_score",
    "rcnn.bbox_pred",
];

/// Anchor label: not sampled.
const IGNORE: i8 = -1;

/// Small proposal + classification detector over pooled region features.
///
/// A shared backbone layer feeds an RPN head (objectness + box deltas per
/// anchor) and an RCNN head (class scores + box deltas per proposal).
/// Gradients are accumulated into a pending buffer during `forward` and only
/// reach the parameters' `grad` in `backward`.
pub struct TwoStageDetector {
    config: DetectorConfig,
    layers: [Layer; 6],
    pending: Vec<(Matrix, Matrix)>,
    has_pending: bool,
    rng: StdRng,
}

impl TwoStageDetector {
    pub fn new(config: DetectorConfig, seed: u64) -> TwoStageDetector {
        let mut rng = StdRng::seed_from_u64(seed);
        let hidden = config.hidden_size.max(1);
        let std = config.init_std;
        let he = |fan_in: usize| (2.0 / fan_in as f64).sqrt();

        let layers = [
            Layer::new(hidden, FEATURE_LEN, ActivationFunction::ReLU, he(FEATURE_LEN), &mut rng),
            Layer::new(1, hidden, ActivationFunction::Sigmoid, std, &mut rng),
            Layer::new(4, hidden, ActivationFunction::Identity, std, &mut rng),
            Layer::new(hidden, hidden, ActivationFunction::ReLU, he(hidden), &mut rng),
            Layer::new(config.num_classes, hidden, ActivationFunction::Softmax, std, &mut rng),
            Layer::new(4, hidden, ActivationFunction::Identity, std, &mut rng),
        ];
        let pending = zero_grads(&layers);

        TwoStageDetector { config, layers, pending, has_pending: false, rng }
    }

    fn accumulate(&mut self, layer: usize, w_grad: &Matrix, b_grad: &Matrix) {
        self.pending[layer].0.add_scaled(w_grad, 1.0);
        self.pending[layer].1.add_scaled(b_grad, 1.0);
    }

    fn backbone_forward(&mut self, features: &[f64]) -> Vec<f64> {
        self.layers[BACKBONE].feed_from(features)
    }

    fn backbone_backward(&mut self, delta: &[f64], features: &[f64]) {
        let (w, b, _) = self.layers[BACKBONE].compute_gradients(delta, features);
        self.accumulate(BACKBONE, &w, &b);
    }

    /// Labels anchors 1 (object), 0 (background) or `IGNORE`, then subsamples.
    fn label_anchors(&mut self, anchors: &[BBox], batch: &Batch) -> Vec<i8> {
        let cfg = &self.config;
        let easy: Vec<&BBox> = batch.gt_boxes.iter().enumerate()
            .filter(|(i, _)| !batch.is_hard(*i))
            .map(|(_, g)| &g.bbox)
            .collect();
        let hard: Vec<&BBox> = batch.gt_boxes.iter().enumerate()
            .filter(|(i, _)| batch.is_hard(*i))
            .map(|(_, g)| &g.bbox)
            .collect();

        let mut labels = vec![IGNORE; anchors.len()];
        for (a, anchor) in anchors.iter().enumerate() {
            let max_iou = easy.iter().map(|g| boxes::iou(anchor, g)).fold(0.0, f64::max);
            if max_iou < cfg.rpn_negative_overlap {
                labels[a] = 0;
            }
            if max_iou >= cfg.rpn_positive_overlap {
                labels[a] = 1;
            }
        }
        // Every object keeps at least its best anchor.
        for g in &easy {
            let best = anchors.iter().enumerate()
                .map(|(a, anchor)| (a, boxes::iou(anchor, g)))
                .max_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((a, iou)) = best {
                if iou > 0.0 {
                    labels[a] = 1;
                }
            }
        }
        for (a, anchor) in anchors.iter().enumerate() {
            if labels[a] == 1 {
                continue;
            }
            let near_hard = hard.iter().any(|g| boxes::iou(anchor, g) >= cfg.rpn_negative_overlap);
            let anchor_area = boxes::area(anchor).max(1.0);
            let in_dontcare = batch.dontcare_areas.iter()
                .any(|d| boxes::intersection(anchor, d) / anchor_area > cfg.dontcare_overlap);
            if near_hard || in_dontcare {
                labels[a] = IGNORE;
            }
        }

        let max_fg = (cfg.rpn_fg_fraction * cfg.rpn_batch_size as f64) as usize;
        let mut fg: Vec<usize> = (0..labels.len()).filter(|&a| labels[a] == 1).collect();
        let kept_fg = subsample(&mut self.rng, &mut fg, max_fg);
        let mut bg: Vec<usize> = (0..labels.len()).filter(|&a| labels[a] == 0).collect();
        let max_bg = cfg.rpn_batch_size.saturating_sub(kept_fg.len());
        let kept_bg = subsample(&mut self.rng, &mut bg, max_bg);

        let mut sampled = vec![IGNORE; labels.len()];
        for a in kept_fg {
            sampled[a] = 1;
        }
        for a in kept_bg {
            sampled[a] = 0;
        }
        sampled
    }

    /// RPN pass over every anchor.  Returns per-anchor (score, deltas) and
    /// the stage losses; sampled anchors contribute gradients.
    fn rpn_stage(
        &mut self,
        batch: &Batch,
        anchors: &[BBox],
        labels: &[i8],
    ) -> (Vec<(f64, Vec<f64>)>, f64, f64) {
        let n = labels.iter().filter(|&&l| l != IGNORE).count().max(1) as f64;
        let easy_gt: Vec<BBox> = batch.gt_boxes.iter().enumerate()
            .filter(|(i, _)| !batch.is_hard(*i))
            .map(|(_, g)| g.bbox)
            .collect();

        let mut outputs = Vec::with_capacity(anchors.len());
        let (mut cls_loss, mut box_loss) = (0.0, 0.0);

        for (a, anchor) in anchors.iter().enumerate() {
            let features = pooling::region_features(&batch.image, anchor);
            let hidden = self.backbone_forward(&features);
            let score = self.layers[RPN_CLS].feed_from(&hidden)[0];
            let deltas = self.layers[RPN_BOX].feed_from(&hidden);

            if labels[a] != IGNORE {
                let y = labels[a] as f64;
                cls_loss += BceLoss::loss(score, y) / n;
                let d_score = BceLoss::derivative(score, y) / n;
                let (w, b, mut d_hidden) = self.layers[RPN_CLS].compute_gradients(&[d_score], &hidden);
                self.accumulate(RPN_CLS, &w, &b);

                if labels[a] == 1 {
                    if let Some(target) = best_match(anchor, &easy_gt) {
                        let target = boxes::transform(anchor, &target);
                        box_loss += SmoothL1Loss::loss(&deltas, &target) / n;
                        let d_deltas: Vec<f64> = SmoothL1Loss::derivative(&deltas, &target)
                            .into_iter().map(|g| g / n).collect();
                        let (w, b, d_box) = self.layers[RPN_BOX].compute_gradients(&d_deltas, &hidden);
                        self.accumulate(RPN_BOX, &w, &b);
                        for (dh, db) in d_hidden.iter_mut().zip(d_box) {
                            *dh += db;
                        }
                    }
                }
                self.backbone_backward(&d_hidden, &features);
            }
            outputs.push((score, deltas));
        }
        (outputs, cls_loss, box_loss)
    }

    /// Decodes, clips and suppresses RPN outputs into proposals.
    fn proposals(&self, anchors: &[BBox], rpn: &[(f64, Vec<f64>)], width: f64, height: f64) -> Vec<BBox> {
        let decoded: Vec<BBox> = anchors.iter().zip(rpn.iter())
            .map(|(a, (_, d))| boxes::clip(&boxes::apply_deltas(a, d), width, height))
            .collect();
        let mut order: Vec<usize> = (0..decoded.len())
            .filter(|&i| boxes::area(&decoded[i]) >= 1.0 && rpn[i].0.is_finite())
            .collect();
        order.sort_by(|&x, &y| rpn[y].0.partial_cmp(&rpn[x].0).unwrap_or(std::cmp::Ordering::Equal));
        boxes::nms(&decoded, &order, self.config.nms_threshold, self.config.post_nms_top_n)
            .into_iter()
            .map(|i| decoded[i])
            .collect()
    }

    /// RCNN pass over sampled proposals.  Returns the stage losses and the
    /// classification counters.
    fn rcnn_stage(&mut self, batch: &Batch, proposals: Vec<BBox>) -> (f64, f64, DebugCounters) {
        let cfg = self.config.clone();
        let easy: Vec<(BBox, usize)> = batch.gt_boxes.iter().enumerate()
            .filter(|(i, _)| !batch.is_hard(*i))
            .map(|(_, g)| (g.bbox, g.class))
            .collect();

        let mut rois = proposals;
        rois.extend(easy.iter().map(|(b, _)| *b));

        // (roi, class, regression target) per candidate
        let mut fg = Vec::new();
        let mut bg = Vec::new();
        for roi in rois {
            let best = easy.iter()
                .map(|(g, c)| (boxes::iou(&roi, g), *g, *c))
                .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));
            match best {
                Some((iou, g, c)) if iou >= cfg.fg_threshold => {
                    fg.push((roi, c, Some(boxes::transform(&roi, &g))));
                }
                Some((iou, _, _)) if iou < cfg.bg_threshold_lo => {}
                _ => bg.push((roi, 0usize, None)),
            }
        }
        let max_fg = (cfg.rcnn_fg_fraction * cfg.rcnn_batch_size as f64).round() as usize;
        fg.shuffle(&mut self.rng);
        fg.truncate(max_fg);
        bg.shuffle(&mut self.rng);
        bg.truncate(cfg.rcnn_batch_size.saturating_sub(fg.len()));

        let mut counters = DebugCounters {
            foreground: fg.len() as f64,
            background: bg.len() as f64,
            ..DebugCounters::default()
        };
        let n = (fg.len() + bg.len()).max(1) as f64;
        let (mut cls_loss, mut box_loss) = (0.0, 0.0);

        for (roi, label, target) in fg.into_iter().chain(bg) {
            let features = pooling::region_features(&batch.image, &roi);
            let hidden = self.backbone_forward(&features);
            let hidden2 = self.layers[RCNN_FC].feed_from(&hidden);
            let probs = self.layers[RCNN_CLS].feed_from(&hidden2);
            let deltas = self.layers[RCNN_BOX].feed_from(&hidden2);

            if argmax(&probs) == label {
                if label == 0 {
                    counters.true_negative += 1.0;
                } else {
                    counters.true_positive += 1.0;
                }
            }

            cls_loss += CrossEntropyLoss::loss(&probs, label) / n;
            let d_logits: Vec<f64> = CrossEntropyLoss::derivative(&probs, label)
                .into_iter().map(|g| g / n).collect();
            let (w, b, mut d_hidden2) = self.layers[RCNN_CLS].compute_gradients(&d_logits, &hidden2);
            self.accumulate(RCNN_CLS, &w, &b);

            if let Some(target) = target {
                box_loss += SmoothL1Loss::loss(&deltas, &target) / n;
                let d_deltas: Vec<f64> = SmoothL1Loss::derivative(&deltas, &target)
                    .into_iter().map(|g| g / n).collect();
                let (w, b, d_box) = self.layers[RCNN_BOX].compute_gradients(&d_deltas, &hidden2);
                self.accumulate(RCNN_BOX, &w, &b);
                for (dh, db) in d_hidden2.iter_mut().zip(d_box) {
                    *dh += db;
                }
            }

            let (w, b, d_hidden) = self.layers[RCNN_FC].compute_gradients(&d_hidden2, &hidden);
            self.accumulate(RCNN_FC, &w, &b);
            self.backbone_backward(&d_hidden, &features);
        }

        (cls_loss, box_loss, counters)
    }
}

impl Detector for TwoStageDetector {
    fn forward(&mut self, batch: &Batch) -> Result<DetectorOutput> {
        if batch.image.width == 0 || batch.image.height == 0 {
            return Err(TrainError::Detector(format!("empty image in batch '{}'", batch.im_name)));
        }
        if let Some(g) = batch.gt_boxes.iter().find(|g| g.class == 0 || g.class >= self.config.num_classes) {
            return Err(TrainError::Detector(format!(
                "class {} outside 1..{} in batch '{}'", g.class, self.config.num_classes, batch.im_name
            )));
        }
        self.pending = zero_grads(&self.layers);

        let (width, height) = (batch.image.width as f64, batch.image.height as f64);
        let anchors: Vec<BBox> = anchors::generate(width, height, self.config.anchor_grid, &self.config.anchor_scales)
            .iter()
            .map(|a| boxes::clip(a, width, height))
            .collect();

        let labels = self.label_anchors(&anchors, batch);
        let (rpn_out, rpn_cls, rpn_box) = self.rpn_stage(batch, &anchors, &labels);
        let proposals = self.proposals(&anchors, &rpn_out, width, height);
        let (rcnn_cls, rcnn_box, counters) = self.rcnn_stage(batch, proposals);

        self.has_pending = true;
        Ok(DetectorOutput::new(
            LossBreakdown { rpn_cls, rpn_box, rcnn_cls, rcnn_box },
            counters,
        ))
    }

    fn backward(&mut self) -> Result<()> {
        if !self.has_pending {
            return Err(TrainError::Detector("backward() called before forward()".into()));
        }
        for (layer, (w, b)) in self.layers.iter_mut().zip(self.pending.iter()) {
            layer.ensure_grad_buffers();
            layer.weights_grad.add_scaled(w, 1.0);
            layer.biases_grad.add_scaled(b, 1.0);
        }
        self.has_pending = false;
        Ok(())
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = Vec::with_capacity(2 * self.layers.len());
        for (name, layer) in LAYER_NAMES.iter().zip(self.layers.iter_mut()) {
            layer.ensure_grad_buffers();
            let [(w, wg), (b, bg)] = layer.params_mut();
            params.push(ParamMut { name: format!("{name}.weight"), value: w, grad: wg });
            params.push(ParamMut { name: format!("{name}.bias"), value: b, grad: bg });
        }
        params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (name, layer) in LAYER_NAMES.iter().zip(self.layers.iter()) {
            state.insert(format!("{name}.weight"), layer.weights.clone());
            state.insert(format!("{name}.bias"), layer.biases.clone());
        }
        state
    }
}

fn zero_grads(layers: &[Layer]) -> Vec<(Matrix, Matrix)> {
    layers.iter()
        .map(|l| (
            Matrix::zeros(l.weights.rows, l.weights.cols),
            Matrix::zeros(l.biases.rows, l.biases.cols),
        ))
        .collect()
}

/// Shuffles `indices` and returns at most `keep` of them.
fn subsample(rng: &mut StdRng, indices: &mut Vec<usize>, keep: usize) -> Vec<usize> {
    if indices.len() > keep {
        indices.shuffle(rng);
        indices.truncate(keep);
    }
    std::mem::take(indices)
}

/// Ground-truth box with the highest overlap with `anchor`.
fn best_match(anchor: &BBox, gt: &[BBox]) -> Option<BBox> {
    gt.iter()
        .map(|g| (boxes::iou(anchor, g), *g))
        .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, g)| g)
}

fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
