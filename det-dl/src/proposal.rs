//! Proposal generation and detection decoding.
//!
//! [`ProposalDecoder`] turns first-stage objectness scores and regression
//! deltas into a ranked, suppressed proposal set. [`ProposalTarget`] builds
//! second-stage training targets from those proposals. [`DetectionDecoder`]
//! turns dense per-level class scores and decoded boxes into the final
//! detection list.

use crate::{
    assign::MaxIoUAssigner,
    codec::BoxCodec,
    common::*,
    config::{AssignerCfg, ProposalCfg, SamplerCfg, TargetNorm, TestCfg},
    geometry::{clamp_boxes, ensure_box_array, pixel_wh},
    meta::ImgMeta,
    nms::{multiclass_nms, nms},
    sample::RandomSampler,
};
use bbox::{Rect, XYXY};
use rand::Rng;

/// A single decoded detection in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub rect: XYXY<f32>,
    pub score: f32,
    /// Class label with 0 reserved for background; detections carry 1..=C.
    pub class: i64,
}

/// Decodes region proposals from first-stage network outputs.
#[derive(Debug, Clone)]
pub struct ProposalDecoder {
    cfg: ProposalCfg,
    codec: BoxCodec,
}

impl ProposalDecoder {
    pub fn new(cfg: ProposalCfg) -> Self {
        Self {
            cfg,
            codec: BoxCodec::default(),
        }
    }

    /// Decode, clamp, filter, rank and suppress anchor-relative regression
    /// outputs into `(boxes [4, K], scores [K])`.
    ///
    /// `scores` is the per-anchor objectness probability; `scale_factor`
    /// scales the minimum-size threshold into the resized image space.
    pub fn propose(
        &self,
        scores: ArrayView1<f32>,
        deltas: ArrayView2<f32>,
        anchors: ArrayView2<f32>,
        img_size: (usize, usize),
        scale_factor: f64,
    ) -> Result<(Array2<f32>, Array1<f32>)> {
        ensure_box_array(&anchors, "anchor array")?;
        ensure!(
            scores.len() == anchors.ncols() && deltas.ncols() == anchors.ncols(),
            "scores ({}), deltas ({}) and anchors ({}) disagree",
            scores.len(),
            deltas.ncols(),
            anchors.ncols()
        );

        let boxes = self.codec.decode(anchors, deltas, Some(img_size))?;
        let (w, h) = pixel_wh(boxes.view())?;
        let min_size = self.cfg.min_size * scale_factor as f32;

        let mut candidates: Vec<usize> = (0..boxes.ncols())
            .filter(|&i| w[i] >= min_size && h[i] >= min_size)
            .sorted_by_key(|&i| Reverse(r32(scores[i])))
            .collect();
        if candidates.len() > self.cfg.pre_nms {
            candidates.truncate(self.cfg.pre_nms);
        }

        let cand_boxes = boxes.select(Axis(1), &candidates);
        let cand_scores: Array1<f32> = candidates.iter().map(|&i| scores[i]).collect();

        let mut keep = nms(cand_boxes.view(), cand_scores.view(), self.cfg.nms_iou)?;
        if keep.len() > self.cfg.post_nms {
            keep.truncate(self.cfg.post_nms);
        }

        let kept_boxes = cand_boxes.select(Axis(1), &keep);
        let kept_scores = cand_scores.select(Axis(0), &keep);
        Ok((kept_boxes, kept_scores))
    }
}

/// The sampled training set of a second-stage head.
#[derive(Debug, Clone)]
pub struct RoiSample {
    /// Chosen proposals, ground-truth boxes included, `[4, K]`.
    pub rois: Array2<f32>,
    /// Per-roi class label, 0 for background.
    pub labels: Array1<i64>,
    /// Normalized regression parameters toward each roi's matched box.
    pub reg_targets: Array2<f32>,
    /// Marks rois that are appended ground truth.
    pub is_gt: Array1<bool>,
}

/// Builds second-stage training targets from proposals and ground truth.
///
/// Ground-truth boxes are appended to the proposal pool before assignment,
/// guaranteeing the assigner perfect-match positives; the `is_gt` mask lets
/// callers exclude them again before refining coordinates.
#[derive(Debug, Clone)]
pub struct ProposalTarget {
    assigner: MaxIoUAssigner,
    sampler: RandomSampler,
    codec: BoxCodec,
}

impl ProposalTarget {
    pub fn new(
        assigner_cfg: AssignerCfg,
        sampler_cfg: SamplerCfg,
        norm: TargetNorm,
    ) -> Result<Self> {
        Ok(Self {
            assigner: MaxIoUAssigner::new(assigner_cfg)?,
            sampler: RandomSampler::new(sampler_cfg)?,
            codec: BoxCodec::new(norm),
        })
    }

    pub fn build<'a, R>(
        &self,
        proposals: ArrayView2<'a, f32>,
        gt: ArrayView2<'a, f32>,
        gt_labels: ArrayView1<i64>,
        rng: &mut R,
    ) -> Result<RoiSample>
    where
        R: Rng,
    {
        ensure_box_array(&proposals, "proposal array")?;
        ensure_box_array(&gt, "ground-truth array")?;
        ensure!(
            gt.ncols() == gt_labels.len(),
            "ground-truth boxes and labels disagree: {} vs {}",
            gt.ncols(),
            gt_labels.len()
        );

        let num_gt = gt.ncols();
        let pool = concatenate(Axis(1), &[gt, proposals])?;

        let assignment = self.assigner.assign(pool.view(), gt)?;
        let mut labels = assignment.labels.clone();
        self.sampler.sample(&mut labels, rng);

        let chosen: Vec<usize> = labels.iter().positions(|&l| l != -1).collect();
        let rois = pool.select(Axis(1), &chosen);

        let roi_labels: Array1<i64> = chosen
            .iter()
            .map(|&i| {
                if labels[i] == 1 {
                    gt_labels[assignment.matched_gt[i]]
                } else {
                    0
                }
            })
            .collect();

        let reg_targets = if num_gt == 0 {
            Array2::zeros((4, chosen.len()))
        } else {
            let matched = assignment.bbox_targets(gt)?.select(Axis(1), &chosen);
            self.codec.encode(rois.view(), matched.view())?
        };

        let is_gt: Array1<bool> = chosen.iter().map(|&i| i < num_gt).collect();

        Ok(RoiSample {
            rois,
            labels: roi_labels,
            reg_targets,
            is_gt,
        })
    }

    /// Refine roi coordinates with a second-stage regression output,
    /// excluding appended ground-truth rois from the result.
    ///
    /// `reg_out` is `[4, K]` or `[4 * C, K]`; in the class-aware case each
    /// roi uses the rows of its own label.
    pub fn refine(
        &self,
        rois: ArrayView2<f32>,
        reg_out: ArrayView2<f32>,
        labels: ArrayView1<i64>,
        is_gt: ArrayView1<bool>,
    ) -> Result<Array2<f32>> {
        ensure_box_array(&rois, "roi array")?;
        ensure!(
            reg_out.ncols() == rois.ncols()
                && labels.len() == rois.ncols()
                && is_gt.len() == rois.ncols(),
            "refinement inputs disagree on the roi count"
        );
        ensure!(
            reg_out.nrows() % 4 == 0,
            "regression output must have 4 * C rows, got {}",
            reg_out.nrows()
        );

        let num_classes = reg_out.nrows() / 4;
        let keep: Vec<usize> = is_gt.iter().positions(|&g| !g).collect();
        let kept_rois = rois.select(Axis(1), &keep);

        let mut params = Array2::<f32>::zeros((4, keep.len()));
        for (out_i, &i) in keep.iter().enumerate() {
            let c = if num_classes == 1 {
                0
            } else {
                let label = labels[i];
                ensure!(
                    (0..num_classes as i64).contains(&label),
                    "roi label {} out of range for {} regression classes",
                    label,
                    num_classes
                );
                label as usize
            };
            for row in 0..4 {
                params[[row, out_i]] = reg_out[[4 * c + row, i]];
            }
        }

        self.codec.decode(kept_rois.view(), params.view(), None)
    }
}

/// One feature level's decoded output: activated class scores `[C, N]` and
/// boxes `[4, N]` in image coordinates.
#[derive(Debug, Clone)]
pub struct LevelOutput {
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
}

/// Decodes dense per-level outputs into the final detection list.
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
    cfg: TestCfg,
}

impl DetectionDecoder {
    pub fn new(cfg: TestCfg) -> Self {
        Self { cfg }
    }

    /// Clamp, size-filter and rank every level, then run multi-class NMS
    /// over the concatenated candidates.
    ///
    /// Boxes narrower or shorter than one pixel are always discarded, so
    /// every surviving detection has a well-formed rectangle. Returned
    /// labels are shifted up by one; 0 stays the background class.
    pub fn decode(&self, levels: &[LevelOutput], meta: &ImgMeta) -> Result<Vec<Detection>> {
        ensure!(!levels.is_empty(), "at least one output level is required");
        let num_channels = levels[0].scores.nrows();
        ensure!(
            levels.iter().all(|l| l.scores.nrows() == num_channels),
            "all levels must share the class channel count"
        );

        let min_size = (self.cfg.min_bbox_size * meta.scale_factor as f32).max(1.0);

        let mut level_boxes = Vec::new();
        let mut level_scores = Vec::new();
        for level in levels {
            ensure_box_array(&level.boxes.view(), "level box array")?;
            ensure!(
                level.scores.ncols() == level.boxes.ncols(),
                "level scores and boxes disagree: {} vs {}",
                level.scores.ncols(),
                level.boxes.ncols()
            );

            let boxes = clamp_boxes(level.boxes.view(), meta.img_shape)?;
            let (w, h) = pixel_wh(boxes.view())?;

            let mut candidates: Vec<usize> = (0..boxes.ncols())
                .filter(|&i| w[i] >= min_size && h[i] >= min_size)
                .collect();

            if self.cfg.pre_nms > 0 && candidates.len() > self.cfg.pre_nms {
                let best_score = |i: usize| {
                    level
                        .scores
                        .column(i)
                        .iter()
                        .cloned()
                        .fold(f32::NEG_INFINITY, f32::max)
                };
                candidates = candidates
                    .into_iter()
                    .sorted_by_key(|&i| Reverse(r32(best_score(i))))
                    .take(self.cfg.pre_nms)
                    .collect();
            }

            level_boxes.push(boxes.select(Axis(1), &candidates));
            level_scores.push(level.scores.select(Axis(1), &candidates));
        }

        let box_views: Vec<_> = level_boxes.iter().map(|b| b.view()).collect();
        let score_views: Vec<_> = level_scores.iter().map(|s| s.view()).collect();
        let all_boxes = concatenate(Axis(1), &box_views)?;
        let all_scores = concatenate(Axis(1), &score_views)?;

        let channels: Vec<usize> = (0..num_channels).collect();
        let (kept_boxes, kept_scores, kept_labels) = multiclass_nms(
            all_boxes.view(),
            all_scores.view(),
            &channels,
            self.cfg.nms_mode,
            self.cfg.nms_iou,
            self.cfg.min_score,
            Some(self.cfg.max_per_img),
        )?;

        izip!(
            kept_boxes.axis_iter(Axis(1)),
            kept_scores.iter(),
            kept_labels.iter()
        )
        .map(|(col, &score, &label)| {
            let rect = XYXY::try_from_xyxy([col[0], col[1], col[2], col[3]])?;
            Ok(Detection {
                rect,
                score,
                class: label + 1,
            })
        })
        .collect()
    }
}

/// Drop appended ground-truth columns from a roi set.
pub fn exclude_gt(boxes: ArrayView2<f32>, is_gt: ArrayView1<bool>) -> Result<Array2<f32>> {
    ensure_box_array(&boxes, "box array")?;
    ensure!(
        boxes.ncols() == is_gt.len(),
        "boxes and mask disagree: {} vs {}",
        boxes.ncols(),
        is_gt.len()
    );
    let keep: Vec<usize> = is_gt.iter().positions(|&g| !g).collect();
    Ok(boxes.select(Axis(1), &keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::NmsMode,
        loss::{ClsLossCfg, NamedLosses, RegLossCfg},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use rand::{rngs::StdRng, SeedableRng};

    fn proposal_cfg() -> ProposalCfg {
        ProposalCfg {
            pre_nms: 12000,
            post_nms: 2000,
            nms_iou: 0.7,
            min_size: 1.0,
        }
    }

    #[test]
    fn propose_filters_ranks_and_caps() -> Result<()> {
        // identity deltas: proposals coincide with anchors
        let anchors = arr2(&[
            [0.0, 0.0, 40.0, 40.5],
            [0.0, 0.0, 40.0, 40.0],
            [20.0, 20.0, 60.0, 40.6],
            [20.0, 20.0, 60.0, 40.2],
        ]);
        let deltas = Array2::<f32>::zeros((4, 4));
        let scores = arr1(&[0.7, 0.9, 0.8, 0.6]);

        let decoder = ProposalDecoder::new(ProposalCfg {
            pre_nms: 3,
            post_nms: 1,
            nms_iou: 0.7,
            min_size: 2.0,
        });
        let (boxes, kept_scores) =
            decoder.propose(scores.view(), deltas.view(), anchors.view(), (100, 100), 1.0)?;

        // the tiny box is dropped by the size filter, NMS collapses the
        // duplicate pair, post_nms keeps the single best survivor
        assert_eq!(boxes.ncols(), 1);
        assert_abs_diff_eq!(kept_scores[0], 0.9, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn propose_rejects_mismatched_inputs() {
        let decoder = ProposalDecoder::new(proposal_cfg());
        let anchors = Array2::<f32>::zeros((4, 5));
        let deltas = Array2::<f32>::zeros((4, 4));
        let scores = Array1::<f32>::zeros(5);
        assert!(decoder
            .propose(scores.view(), deltas.view(), anchors.view(), (100, 100), 1.0)
            .is_err());
    }

    fn proposal_target() -> Result<ProposalTarget> {
        ProposalTarget::new(
            AssignerCfg {
                pos_iou: 0.5,
                neg_iou: 0.5,
                neg_iou_lo: 0.0,
            },
            SamplerCfg {
                max_pos: 32,
                max_total: 128,
            },
            TargetNorm {
                means: [0.0; 4],
                stds: [0.1, 0.1, 0.2, 0.2],
            },
        )
    }

    #[test]
    fn ground_truth_is_appended_and_flagged() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let proposals = arr2(&[
            [8.0, 200.0],
            [8.0, 200.0],
            [52.0, 240.0],
            [52.0, 240.0],
        ]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);
        let gt_labels = arr1(&[3i64]);

        let target = proposal_target()?;
        let sample = target.build(proposals.view(), gt.view(), gt_labels.view(), &mut rng)?;

        // the appended gt is a perfect-match positive carrying its class
        assert!(sample.is_gt[0]);
        assert_eq!(sample.labels[0], 3);
        assert_eq!(sample.rois.column(0).to_vec(), vec![10.0, 10.0, 50.0, 50.0]);
        // its regression target is the identity
        for row in 0..4 {
            assert_abs_diff_eq!(sample.reg_targets[[row, 0]], 0.0, epsilon = 1e-5);
        }
        // the overlapping proposal is positive, the far one background
        let labels = sample.labels.to_vec();
        assert!(labels.contains(&3));
        assert!(labels.contains(&0));
        Ok(())
    }

    #[test]
    fn refine_excludes_ground_truth() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let proposals = arr2(&[[8.0], [8.0], [52.0], [52.0]]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);
        let gt_labels = arr1(&[3i64]);

        let target = proposal_target()?;
        let sample = target.build(proposals.view(), gt.view(), gt_labels.view(), &mut rng)?;
        let num_rois = sample.rois.ncols();

        let reg_out = Array2::<f32>::zeros((4, num_rois));
        let refined = target.refine(
            sample.rois.view(),
            reg_out.view(),
            sample.labels.view(),
            sample.is_gt.view(),
        )?;
        let num_gt = sample.is_gt.iter().filter(|&&g| g).count();
        assert_eq!(refined.ncols(), num_rois - num_gt);

        let plain = exclude_gt(sample.rois.view(), sample.is_gt.view())?;
        assert_eq!(plain.ncols(), num_rois - num_gt);
        Ok(())
    }

    fn test_cfg(mode: NmsMode) -> TestCfg {
        TestCfg {
            pre_nms: 1000,
            min_bbox_size: 0.0,
            min_score: 0.05,
            nms_iou: 0.5,
            nms_mode: mode,
            max_per_img: 100,
        }
    }

    #[test]
    fn detection_decoder_emits_shifted_labels() -> Result<()> {
        let meta = ImgMeta::new((100, 100), (100, 128), 1.0);
        let boxes = arr2(&[[0.0, 60.0], [0.0, 60.0], [20.0, 90.0], [20.0, 90.0]]);
        let scores = arr2(&[[0.9, 0.02], [0.1, 0.8]]);
        let decoder = DetectionDecoder::new(test_cfg(NmsMode::Strict));

        let detections = decoder.decode(
            &[LevelOutput {
                scores: scores.clone(),
                boxes: boxes.clone(),
            }],
            &meta,
        )?;

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class, 1);
        assert_eq!(detections[1].class, 2);
        assert!(detections[0].score > detections[1].score);
        Ok(())
    }

    #[test]
    fn strict_mode_keeps_cross_class_overlaps() -> Result<()> {
        // two fully overlapping boxes, each the top score of its own class
        let meta = ImgMeta::new((100, 100), (100, 128), 1.0);
        let boxes = arr2(&[[10.0, 10.0], [10.0, 10.0], [40.0, 40.0], [40.0, 40.0]]);
        let scores = arr2(&[[0.9, 0.1], [0.2, 0.8]]);
        let decoder = DetectionDecoder::new(test_cfg(NmsMode::Strict));

        let detections = decoder.decode(
            &[LevelOutput {
                scores: scores.clone(),
                boxes: boxes.clone(),
            }],
            &meta,
        )?;
        assert_eq!(detections.len(), 2);
        let classes: Vec<i64> = detections.iter().map(|d| d.class).collect();
        assert!(classes.contains(&1) && classes.contains(&2));
        Ok(())
    }

    #[test]
    fn end_to_end_single_ground_truth() -> Result<()> {
        // 1 image, 1 gt box (10,10,50,50) with label 3, a grid of 4
        // references of which exactly one is (8,8,52,52)
        let references = arr2(&[
            [8.0, 200.0, 300.0, 400.0],
            [8.0, 200.0, 300.0, 400.0],
            [52.0, 240.0, 340.0, 440.0],
            [52.0, 240.0, 340.0, 440.0],
        ]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);

        let assigner = MaxIoUAssigner::new(AssignerCfg {
            pos_iou: 0.7,
            neg_iou: 0.3,
            neg_iou_lo: 0.0,
        })?;
        let assignment = assigner.assign(references.view(), gt.view())?;
        assert_eq!(assignment.labels[0], 1);
        assert_eq!(assignment.matched_gt[0], 0);

        let codec = BoxCodec::default();
        let matched = assignment.bbox_targets(gt.view())?;
        let params = codec.encode(references.view(), matched.view())?;
        let decoded = codec.decode(references.view(), params.view(), None)?;
        for row in 0..4 {
            assert_abs_diff_eq!(decoded[[row, 0]], gt[[row, 0]], epsilon = 1e-3);
        }

        // the reference's own parameters round-trip to (8,8,52,52)
        let self_params = codec.encode(references.view(), references.view())?;
        let self_decoded = codec.decode(references.view(), self_params.view(), None)?;
        assert_abs_diff_eq!(self_decoded[[0, 0]], 8.0, epsilon = 1e-3);
        assert_abs_diff_eq!(self_decoded[[3, 0]], 52.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn end_to_end_empty_ground_truth() -> Result<()> {
        // empty gt, 100 references: everything negative, classification
        // runs over all negatives, regression sees the defined zero
        let mut rng = StdRng::seed_from_u64(11);
        let references = {
            let mut r = Array2::<f32>::zeros((4, 100));
            for (i, mut col) in r.axis_iter_mut(Axis(1)).enumerate() {
                let x = (i % 10) as f32 * 10.0;
                let y = (i / 10) as f32 * 10.0;
                col[0] = x;
                col[1] = y;
                col[2] = x + 9.0;
                col[3] = y + 9.0;
            }
            r
        };
        let gt = Array2::<f32>::zeros((4, 0));

        let assigner = MaxIoUAssigner::new(AssignerCfg {
            pos_iou: 0.7,
            neg_iou: 0.3,
            neg_iou_lo: 0.0,
        })?;
        let mut assignment = assigner.assign(references.view(), gt.view())?;
        assert_eq!(assignment.num_negative(), 100);

        let sampler = RandomSampler::new(SamplerCfg {
            max_pos: 128,
            max_total: 256,
        })?;
        sampler.sample(&mut assignment.labels, &mut rng);

        let chosen: Vec<usize> = assignment
            .labels
            .iter()
            .positions(|&l| l != -1)
            .collect();
        assert_eq!(chosen.len(), 100);

        // classification over all negatives
        let cls_loss = ClsLossCfg::CrossEntropy {
            use_sigmoid: false,
            loss_weight: 1.0,
        }
        .build()?;
        let logits = Array2::<f32>::zeros((2, chosen.len()));
        let labels = Array1::<i64>::zeros(chosen.len());
        let cls = cls_loss.forward(logits.view(), labels.view())?;
        assert!(cls > 0.0);

        // regression over zero positives returns the defined zero
        let reg_loss = RegLossCfg::SmoothL1 {
            beta: 1.0,
            loss_weight: 1.0,
        }
        .build()?;
        let empty = Array2::<f32>::zeros((4, 0));
        let reg = reg_loss.forward(empty.view(), empty.view())?;
        assert_eq!(reg, 0.0);

        let mut losses = NamedLosses::new();
        losses.insert("cls_loss".into(), cls / chosen.len() as f64);
        losses.insert("reg_loss".into(), reg);
        assert!(losses.values().sum::<f64>() > 0.0);
        Ok(())
    }
}
