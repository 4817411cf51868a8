//! Bounding-box regression parameter codec.
//!
//! `encode` expresses a target box relative to a base box as
//! `(tx, ty, tw, th)`: normalized center offsets in base width/height units
//! and log extent ratios. `decode` inverts it. Extents follow the inclusive
//! pixel convention and corners are reconstructed as `cx +/- (w - 1) / 2`,
//! so `decode(base, encode(base, target))` reproduces `target` exactly up to
//! floating-point error.
//!
//! Bases with non-positive pixel extent produce non-finite parameters; it is
//! the caller's responsibility to avoid degenerate bases.

use crate::{
    common::*,
    config::TargetNorm,
    geometry::{clamp_boxes, ensure_box_array},
};

#[derive(Debug, Clone, Default)]
pub struct BoxCodec {
    norm: TargetNorm,
}

impl BoxCodec {
    pub fn new(norm: TargetNorm) -> Self {
        Self { norm }
    }

    pub fn encode(&self, base: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<Array2<f32>> {
        ensure_box_array(&base, "base box array")?;
        ensure!(
            base.dim() == target.dim(),
            "base and target shapes differ: [{}, {}] vs [{}, {}]",
            base.nrows(),
            base.ncols(),
            target.nrows(),
            target.ncols()
        );

        let TargetNorm { means, stds } = self.norm;
        let n = base.ncols();
        let mut param = Array2::<f32>::zeros((4, n));
        for i in 0..n {
            let bw = base[[2, i]] - base[[0, i]] + 1.0;
            let bh = base[[3, i]] - base[[1, i]] + 1.0;
            let bcx = (base[[0, i]] + base[[2, i]]) / 2.0;
            let bcy = (base[[1, i]] + base[[3, i]]) / 2.0;

            let tw = target[[2, i]] - target[[0, i]] + 1.0;
            let th = target[[3, i]] - target[[1, i]] + 1.0;
            let tcx = (target[[0, i]] + target[[2, i]]) / 2.0;
            let tcy = (target[[1, i]] + target[[3, i]]) / 2.0;

            param[[0, i]] = ((tcx - bcx) / bw - means[0]) / stds[0];
            param[[1, i]] = ((tcy - bcy) / bh - means[1]) / stds[1];
            param[[2, i]] = ((tw / bw).ln() - means[2]) / stds[2];
            param[[3, i]] = ((th / bh).ln() - means[3]) / stds[3];
        }
        Ok(param)
    }

    pub fn decode(
        &self,
        base: ArrayView2<f32>,
        param: ArrayView2<f32>,
        clamp_to: Option<(usize, usize)>,
    ) -> Result<Array2<f32>> {
        ensure_box_array(&base, "base box array")?;
        ensure!(
            base.dim() == param.dim(),
            "base and parameter shapes differ: [{}, {}] vs [{}, {}]",
            base.nrows(),
            base.ncols(),
            param.nrows(),
            param.ncols()
        );

        let TargetNorm { means, stds } = self.norm;
        let n = base.ncols();
        let mut boxes = Array2::<f32>::zeros((4, n));
        for i in 0..n {
            let bw = base[[2, i]] - base[[0, i]] + 1.0;
            let bh = base[[3, i]] - base[[1, i]] + 1.0;
            let bcx = (base[[0, i]] + base[[2, i]]) / 2.0;
            let bcy = (base[[1, i]] + base[[3, i]]) / 2.0;

            let tx = param[[0, i]] * stds[0] + means[0];
            let ty = param[[1, i]] * stds[1] + means[1];
            let tw = param[[2, i]] * stds[2] + means[2];
            let th = param[[3, i]] * stds[3] + means[3];

            let cx = tx * bw + bcx;
            let cy = ty * bh + bcy;
            let w = tw.exp() * bw;
            let h = th.exp() * bh;

            boxes[[0, i]] = cx - (w - 1.0) / 2.0;
            boxes[[1, i]] = cy - (h - 1.0) / 2.0;
            boxes[[2, i]] = cx + (w - 1.0) / 2.0;
            boxes[[3, i]] = cy + (h - 1.0) / 2.0;
        }

        match clamp_to {
            Some(image_size) => clamp_boxes(boxes.view(), image_size),
            None => Ok(boxes),
        }
    }

    /// Decode a `[4 * C, N]` per-class regression output against shared
    /// bases, returning `[4 * C, N]` decoded boxes.
    pub fn decode_classwise(
        &self,
        base: ArrayView2<f32>,
        param: ArrayView2<f32>,
        clamp_to: Option<(usize, usize)>,
    ) -> Result<Array2<f32>> {
        ensure_box_array(&base, "base box array")?;
        ensure!(
            param.nrows() % 4 == 0 && param.ncols() == base.ncols(),
            "per-class parameters must have shape [4 * C, {}], got [{}, {}]",
            base.ncols(),
            param.nrows(),
            param.ncols()
        );

        let num_classes = param.nrows() / 4;
        if num_classes == 1 {
            return self.decode(base, param, clamp_to);
        }

        let mut boxes = Array2::<f32>::zeros(param.dim());
        for c in 0..num_classes {
            let rows = s![4 * c..4 * (c + 1), ..];
            let decoded = self.decode(base, param.slice(rows), clamp_to)?;
            boxes.slice_mut(rows).assign(&decoded);
        }
        Ok(boxes)
    }
}
