//! Dense geometry over `[4, N]` box arrays.
//!
//! Boxes are stored axis-major: row 0 is `x_min`, row 1 `y_min`, row 2
//! `x_max`, row 3 `y_max`. Pixel extents follow the inclusive convention,
//! `w = x_max - x_min + 1`, everywhere in this crate.

use crate::common::*;

pub(crate) fn ensure_box_array(boxes: &ArrayView2<f32>, what: &str) -> Result<()> {
    ensure!(
        boxes.nrows() == 4,
        "{} must have 4 rows, got shape [{}, {}]",
        what,
        boxes.nrows(),
        boxes.ncols()
    );
    Ok(())
}

/// Pairwise IoU table of shape `[n, m]`.
pub fn iou_table(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
    ensure_box_array(&a, "first box array")?;
    ensure_box_array(&b, "second box array")?;

    let n = a.ncols();
    let m = b.ncols();
    let mut table = Array2::<f32>::zeros((n, m));

    for i in 0..n {
        let (ax0, ay0, ax1, ay1) = (a[[0, i]], a[[1, i]], a[[2, i]], a[[3, i]]);
        let area_a = (ax1 - ax0 + 1.0) * (ay1 - ay0 + 1.0);
        for j in 0..m {
            let (bx0, by0, bx1, by1) = (b[[0, j]], b[[1, j]], b[[2, j]], b[[3, j]]);
            let area_b = (bx1 - bx0 + 1.0) * (by1 - by0 + 1.0);
            let iw = (ax1.min(bx1) - ax0.max(bx0) + 1.0).max(0.0);
            let ih = (ay1.min(by1) - ay0.max(by0) + 1.0).max(0.0);
            let inter = iw * ih;
            table[[i, j]] = inter / (area_a + area_b - inter);
        }
    }

    Ok(table)
}

/// Elementwise IoU of two equally shaped box arrays.
pub fn elem_iou(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array1<f32>> {
    ensure_box_array(&a, "first box array")?;
    ensure!(
        a.dim() == b.dim(),
        "box arrays must have equal shapes, got [{}, {}] and [{}, {}]",
        a.nrows(),
        a.ncols(),
        b.nrows(),
        b.ncols()
    );

    let n = a.ncols();
    let mut iou = Array1::<f32>::zeros(n);
    for i in 0..n {
        let (ax0, ay0, ax1, ay1) = (a[[0, i]], a[[1, i]], a[[2, i]], a[[3, i]]);
        let (bx0, by0, bx1, by1) = (b[[0, i]], b[[1, i]], b[[2, i]], b[[3, i]]);
        let area_a = (ax1 - ax0 + 1.0) * (ay1 - ay0 + 1.0);
        let area_b = (bx1 - bx0 + 1.0) * (by1 - by0 + 1.0);
        let iw = (ax1.min(bx1) - ax0.max(bx0) + 1.0).max(0.0);
        let ih = (ay1.min(by1) - ay0.max(by0) + 1.0).max(0.0);
        let inter = iw * ih;
        iou[i] = inter / (area_a + area_b - inter);
    }
    Ok(iou)
}

/// Clip x coordinates into `[0, W - 1]` and y coordinates into `[0, H - 1]`.
pub fn clamp_boxes(boxes: ArrayView2<f32>, image_size: (usize, usize)) -> Result<Array2<f32>> {
    ensure_box_array(&boxes, "box array")?;
    let (h, w) = image_size;
    let x_hi = w as f32 - 1.0;
    let y_hi = h as f32 - 1.0;

    let mut out = boxes.to_owned();
    for mut col in out.axis_iter_mut(Axis(1)) {
        col[0] = col[0].max(0.0).min(x_hi);
        col[1] = col[1].max(0.0).min(y_hi);
        col[2] = col[2].max(0.0).min(x_hi);
        col[3] = col[3].max(0.0).min(y_hi);
    }
    Ok(out)
}

/// Inclusive pixel widths and heights, `(w, h)`.
pub fn pixel_wh(boxes: ArrayView2<f32>) -> Result<(Array1<f32>, Array1<f32>)> {
    ensure_box_array(&boxes, "box array")?;
    let w = &boxes.row(2) - &boxes.row(0) + 1.0;
    let h = &boxes.row(3) - &boxes.row(1) + 1.0;
    Ok((w, h))
}

/// Box centers, `(cx, cy)`.
pub fn centers(boxes: ArrayView2<f32>) -> Result<(Array1<f32>, Array1<f32>)> {
    ensure_box_array(&boxes, "box array")?;
    let cx = (&boxes.row(0) + &boxes.row(2)) / 2.0;
    let cy = (&boxes.row(1) + &boxes.row(3)) / 2.0;
    Ok((cx, cy))
}

/// Corner boxes to `(x, y, w, h)` with inclusive extents.
pub fn xyxy_to_xywh(boxes: ArrayView2<f32>) -> Result<Array2<f32>> {
    ensure_box_array(&boxes, "box array")?;
    let mut out = boxes.to_owned();
    for mut col in out.axis_iter_mut(Axis(1)) {
        col[2] = col[2] - col[0] + 1.0;
        col[3] = col[3] - col[1] + 1.0;
    }
    Ok(out)
}

/// `(x, y, w, h)` boxes with inclusive extents back to corners.
pub fn xywh_to_xyxy(boxes: ArrayView2<f32>) -> Result<Array2<f32>> {
    ensure_box_array(&boxes, "box array")?;
    let mut out = boxes.to_owned();
    for mut col in out.axis_iter_mut(Axis(1)) {
        col[2] = col[0] + col[2] - 1.0;
        col[3] = col[1] + col[3] - 1.0;
    }
    Ok(out)
}

/// Grow or shrink every box about its center.
pub fn scale_about_center(boxes: ArrayView2<f32>, scale: f32) -> Result<Array2<f32>> {
    ensure_box_array(&boxes, "box array")?;
    ensure!(scale > 0.0, "scaling factor must be positive");

    let mut out = boxes.to_owned();
    for mut col in out.axis_iter_mut(Axis(1)) {
        let cx = (col[0] + col[2]) / 2.0;
        let cy = (col[1] + col[3]) / 2.0;
        let half_w = (col[2] - col[0] + 1.0) * scale / 2.0;
        let half_h = (col[3] - col[1] + 1.0) * scale / 2.0;
        col[0] = cx - half_w;
        col[1] = cy - half_h;
        col[2] = cx + half_w;
        col[3] = cy + half_h;
    }
    Ok(out)
}

/// Mark references lying fully inside the padded image.
pub fn inside_mask(boxes: ArrayView2<f32>, image_size: (usize, usize)) -> Result<Array1<bool>> {
    ensure_box_array(&boxes, "box array")?;
    let (h, w) = image_size;
    let x_hi = w as f32 - 1.0;
    let y_hi = h as f32 - 1.0;

    let mask = boxes
        .axis_iter(Axis(1))
        .map(|col| col[0] >= 0.0 && col[1] >= 0.0 && col[2] <= x_hi && col[3] <= y_hi)
        .collect();
    Ok(mask)
}
