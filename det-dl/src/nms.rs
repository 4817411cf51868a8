//! Non-maximum suppression over `[4, N]` box arrays.

use crate::{
    common::*,
    config::NmsMode,
    geometry::ensure_box_array,
};

fn pair_iou(boxes: &ArrayView2<f32>, i: usize, j: usize) -> f32 {
    let (ax0, ay0, ax1, ay1) = (boxes[[0, i]], boxes[[1, i]], boxes[[2, i]], boxes[[3, i]]);
    let (bx0, by0, bx1, by1) = (boxes[[0, j]], boxes[[1, j]], boxes[[2, j]], boxes[[3, j]]);
    let area_a = (ax1 - ax0 + 1.0) * (ay1 - ay0 + 1.0);
    let area_b = (bx1 - bx0 + 1.0) * (by1 - by0 + 1.0);
    let iw = (ax1.min(bx1) - ax0.max(bx0) + 1.0).max(0.0);
    let ih = (ay1.min(by1) - ay0.max(by0) + 1.0).max(0.0);
    let inter = iw * ih;
    inter / (area_a + area_b - inter)
}

/// Greedy single-class NMS.
///
/// Boxes are visited in descending score order; a box survives unless its
/// IoU with an already kept box exceeds `iou_threshold`. Returns surviving
/// indices in descending score order.
pub fn nms(boxes: ArrayView2<f32>, scores: ArrayView1<f32>, iou_threshold: f32) -> Result<Vec<usize>> {
    ensure_box_array(&boxes, "box array")?;
    ensure!(
        boxes.ncols() == scores.len(),
        "boxes and scores disagree: {} boxes, {} scores",
        boxes.ncols(),
        scores.len()
    );

    let n = boxes.ncols();
    let order: Vec<usize> = (0..n).sorted_by_key(|&i| Reverse(r32(scores[i]))).collect();

    let mut keep = Vec::new();
    for &i in &order {
        let survives = keep
            .iter()
            .all(|&j| pair_iou(&boxes, i, j) <= iou_threshold);
        if survives {
            keep.push(i);
        }
    }
    Ok(keep)
}

/// NMS restricted to same-label groups.
///
/// Coordinates are shifted per label by a constant larger than any box
/// extent so that boxes of different labels can never overlap, then plain
/// NMS runs on the shifted set.
pub fn batched_nms(
    boxes: ArrayView2<f32>,
    scores: ArrayView1<f32>,
    labels: ArrayView1<i64>,
    iou_threshold: f32,
) -> Result<Vec<usize>> {
    ensure_box_array(&boxes, "box array")?;
    ensure!(
        boxes.ncols() == scores.len() && scores.len() == labels.len(),
        "boxes, scores and labels disagree: {}, {}, {}",
        boxes.ncols(),
        scores.len(),
        labels.len()
    );

    if boxes.ncols() == 0 {
        return Ok(Vec::new());
    }

    let max_coord = boxes.iter().cloned().fold(0.0f32, f32::max);
    let offset_unit = max_coord + 1.0;

    let mut shifted = boxes.to_owned();
    for (mut col, &label) in izip!(shifted.axis_iter_mut(Axis(1)), labels.iter()) {
        let offset = label as f32 * offset_unit;
        col += offset;
    }
    nms(shifted.view(), scores, iou_threshold)
}

/// Multi-class NMS over `[C, N]` score matrices.
///
/// `boxes` is `[4, N]` (shared across classes) or `[4 * C, N]` (per-class
/// regression). Only channels listed in `channels` participate. In
/// [`NmsMode::Official`] a box enters once per channel whose score reaches
/// `score_threshold`; in [`NmsMode::Strict`] a box enters once, under its
/// best-scoring channel. Returns `(boxes [4, K], scores [K], labels [K])`
/// in descending score order, truncated to `max_num` when given.
pub fn multiclass_nms(
    boxes: ArrayView2<f32>,
    scores: ArrayView2<f32>,
    channels: &[usize],
    mode: NmsMode,
    iou_threshold: f32,
    score_threshold: f32,
    max_num: Option<usize>,
) -> Result<(Array2<f32>, Array1<f32>, Array1<i64>)> {
    let num_channels = scores.nrows();
    let num_boxes = scores.ncols();
    let classwise = boxes.nrows() != 4;
    ensure!(
        boxes.nrows() == 4 || boxes.nrows() == 4 * num_channels,
        "boxes must have 4 or 4 * {} rows, got {}",
        num_channels,
        boxes.nrows()
    );
    ensure!(
        boxes.ncols() == num_boxes,
        "boxes and scores disagree: {} boxes, {} score columns",
        boxes.ncols(),
        num_boxes
    );
    ensure!(
        channels.iter().all(|&c| c < num_channels),
        "nms channel out of range, {} channels available",
        num_channels
    );

    let box_of = |i: usize, c: usize| -> [f32; 4] {
        let r = if classwise { 4 * c } else { 0 };
        [
            boxes[[r, i]],
            boxes[[r + 1, i]],
            boxes[[r + 2, i]],
            boxes[[r + 3, i]],
        ]
    };

    let mut cand_boxes: Vec<[f32; 4]> = Vec::new();
    let mut cand_scores: Vec<f32> = Vec::new();
    let mut cand_labels: Vec<i64> = Vec::new();

    match mode {
        NmsMode::Official => {
            for &c in channels {
                for i in 0..num_boxes {
                    let score = scores[[c, i]];
                    if score >= score_threshold {
                        cand_boxes.push(box_of(i, c));
                        cand_scores.push(score);
                        cand_labels.push(c as i64);
                    }
                }
            }
        }
        NmsMode::Strict => {
            for i in 0..num_boxes {
                let (best_c, best) = channels
                    .iter()
                    .map(|&c| (c, scores[[c, i]]))
                    .fold((0, f32::NEG_INFINITY), |(bc, bv), (c, v)| {
                        if v > bv {
                            (c, v)
                        } else {
                            (bc, bv)
                        }
                    });
                if best >= score_threshold {
                    cand_boxes.push(box_of(i, best_c));
                    cand_scores.push(best);
                    cand_labels.push(best_c as i64);
                }
            }
        }
    }

    let num_cand = cand_scores.len();
    let mut flat = Array2::<f32>::zeros((4, num_cand));
    for (i, b) in cand_boxes.iter().enumerate() {
        for row in 0..4 {
            flat[[row, i]] = b[row];
        }
    }
    let cand_scores = Array1::from(cand_scores);
    let cand_labels = Array1::from(cand_labels);

    let mut keep = batched_nms(
        flat.view(),
        cand_scores.view(),
        cand_labels.view(),
        iou_threshold,
    )?;
    if let Some(max_num) = max_num {
        keep.truncate(max_num);
    }

    let kept_boxes = flat.select(Axis(1), &keep);
    let kept_scores = cand_scores.select(Axis(0), &keep);
    let kept_labels = cand_labels.select(Axis(0), &keep);
    Ok((kept_boxes, kept_scores, kept_labels))
}
