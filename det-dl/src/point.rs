//! Grid-point targets for anchor-free dense heads.
//!
//! Each ground-truth box is assigned to a single pyramid level by its
//! scale; cells whose center falls strictly inside the box become positive
//! and regress the four signed distances to the box edges.

use crate::common::*;

const CENTERNESS_EPS: f32 = 1e-6;

/// Per-level targets for a point-based head.
///
/// `cls` holds the class label per cell (0 = background), `ltrb` the
/// left/top/right/bottom edge distances as `[h, w, 4]`, `centerness` the
/// auxiliary center quality, and `pos_mask` the positive cells.
#[derive(Debug, Clone)]
pub struct PointTargets {
    pub cls: Vec<Array2<i64>>,
    pub ltrb: Vec<Array3<f32>>,
    pub centerness: Vec<Array2<f32>>,
    pub pos_mask: Vec<Array2<bool>>,
}

fn pixel_scale(gt: &ArrayView2<f32>, i: usize) -> f32 {
    let w = gt[[2, i]] - gt[[0, i]] + 1.0;
    let h = gt[[3, i]] - gt[[1, i]] + 1.0;
    (w * h).sqrt()
}

/// Map each ground-truth box to a pyramid level by its scale.
///
/// `level = floor(log2(scale / (base_scale * strides[0])) + 0.5)` clamped
/// into the valid level range, with `scale = sqrt(pixel area)`.
pub fn map_boxes_to_levels(
    gt: ArrayView2<f32>,
    base_scale: f32,
    strides: &[usize],
) -> Result<Array1<usize>> {
    ensure!(gt.nrows() == 4, "ground-truth array must have 4 rows");
    ensure!(!strides.is_empty(), "strides must not be empty");
    ensure!(base_scale > 0.0, "base scale must be positive");

    let min_anchor_size = base_scale * strides[0] as f32;
    let num_levels = strides.len();
    let levels = (0..gt.ncols())
        .map(|i| {
            let lvl = ((pixel_scale(&gt, i) / min_anchor_size).log2() + 0.5).floor();
            (lvl.max(0.0) as usize).min(num_levels - 1)
        })
        .collect();
    Ok(levels)
}

pub fn centerness(l: f32, t: f32, r: f32, b: f32) -> f32 {
    let l = l + CENTERNESS_EPS;
    let t = t + CENTERNESS_EPS;
    let r = r + CENTERNESS_EPS;
    let b = b + CENTERNESS_EPS;
    ((l.min(r) / l.max(r)) * (t.min(b) / t.max(b))).sqrt()
}

/// Build per-level classification, regression and centerness targets.
///
/// Ground truth is processed in descending area order so that when boxes
/// compete for a cell the smaller one wins.
pub fn point_targets(
    gt: ArrayView2<f32>,
    gt_labels: ArrayView1<i64>,
    grids: &[(usize, usize)],
    strides: &[usize],
    base_scale: f32,
) -> Result<PointTargets> {
    ensure!(gt.nrows() == 4, "ground-truth array must have 4 rows");
    ensure!(
        gt.ncols() == gt_labels.len(),
        "ground-truth boxes and labels disagree: {} vs {}",
        gt.ncols(),
        gt_labels.len()
    );
    ensure!(
        grids.len() == strides.len(),
        "one grid per stride required: {} grids, {} strides",
        grids.len(),
        strides.len()
    );

    let num_levels = strides.len();
    let mut cls: Vec<Array2<i64>> = grids
        .iter()
        .map(|&(h, w)| Array2::zeros((h, w)))
        .collect();
    let mut ltrb: Vec<Array3<f32>> = grids
        .iter()
        .map(|&(h, w)| Array3::zeros((h, w, 4)))
        .collect();
    let mut pos_mask: Vec<Array2<bool>> = grids
        .iter()
        .map(|&(h, w)| Array2::from_elem((h, w), false))
        .collect();

    if gt.ncols() == 0 {
        warn!("point target builder received no ground truth");
        let centerness = grids.iter().map(|&(h, w)| Array2::zeros((h, w))).collect();
        return Ok(PointTargets {
            cls,
            ltrb,
            centerness,
            pos_mask,
        });
    }

    let levels = map_boxes_to_levels(gt, base_scale, strides)?;

    // big boxes first; smaller boxes overwrite on conflict
    let order: Vec<usize> = (0..gt.ncols())
        .sorted_by_key(|&i| Reverse(r32(pixel_scale(&gt, i))))
        .collect();

    for &i in &order {
        let lvl = levels[i];
        let stride = strides[lvl] as f32;
        let (grid_h, grid_w) = grids[lvl];
        let (x0, y0, x1, y1) = (gt[[0, i]], gt[[1, i]], gt[[2, i]], gt[[3, i]]);

        for row in 0..grid_h {
            let cy = row as f32 * stride + stride / 2.0;
            for col in 0..grid_w {
                let cx = col as f32 * stride + stride / 2.0;
                let (l, t, r, b) = (cx - x0, cy - y0, x1 - cx, y1 - cy);
                if l > 0.0 && t > 0.0 && r > 0.0 && b > 0.0 {
                    cls[lvl][[row, col]] = gt_labels[i];
                    ltrb[lvl][[row, col, 0]] = l;
                    ltrb[lvl][[row, col, 1]] = t;
                    ltrb[lvl][[row, col, 2]] = r;
                    ltrb[lvl][[row, col, 3]] = b;
                    pos_mask[lvl][[row, col]] = true;
                }
            }
        }
    }

    let centerness = (0..num_levels)
        .map(|lvl| {
            let (grid_h, grid_w) = grids[lvl];
            let mut ctr = Array2::<f32>::zeros((grid_h, grid_w));
            for row in 0..grid_h {
                for col in 0..grid_w {
                    if pos_mask[lvl][[row, col]] {
                        ctr[[row, col]] = centerness(
                            ltrb[lvl][[row, col, 0]],
                            ltrb[lvl][[row, col, 1]],
                            ltrb[lvl][[row, col, 2]],
                            ltrb[lvl][[row, col, 3]],
                        );
                    }
                }
            }
            ctr
        })
        .collect();

    Ok(PointTargets {
        cls,
        ltrb,
        centerness,
        pos_mask,
    })
}

/// Invert per-cell edge distances into `[4, h * w]` boxes.
///
/// `ltrb` has shape `[4, h, w]` as produced by a regression head.
pub fn decode_points(ltrb: ArrayView3<f32>, stride: usize) -> Result<Array2<f32>> {
    let (c, grid_h, grid_w) = ltrb.dim();
    ensure!(c == 4, "edge-distance array must have 4 leading channels, got {}", c);

    let stride = stride as f32;
    let mut boxes = Array2::<f32>::zeros((4, grid_h * grid_w));
    for row in 0..grid_h {
        let cy = row as f32 * stride + stride / 2.0;
        for col in 0..grid_w {
            let cx = col as f32 * stride + stride / 2.0;
            let i = row * grid_w + col;
            boxes[[0, i]] = cx - ltrb[[0, row, col]];
            boxes[[1, i]] = cy - ltrb[[1, row, col]];
            boxes[[2, i]] = cx + ltrb[[2, row, col]];
            boxes[[3, i]] = cy + ltrb[[3, row, col]];
        }
    }
    Ok(boxes)
}
