//! IoU-based assignment of ground truth to reference boxes.

use crate::{
    common::*,
    config::AssignerCfg,
    geometry::{ensure_box_array, iou_table},
};

/// The outcome of matching ground truth against a reference set.
///
/// `labels[i]` is 1 (positive), 0 (negative) or -1 (ignore). `matched_gt[i]`
/// is the index of the ground-truth box with the highest IoU against
/// reference `i`; it is defined for every reference, negatives included, and
/// zero when there is no ground truth at all.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub labels: Array1<i32>,
    pub matched_gt: Array1<usize>,
    pub max_iou: Array1<f32>,
}

impl Assignment {
    pub fn num_positive(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    pub fn num_negative(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 0).count()
    }

    /// Gather each reference's matched ground-truth box into `[4, N]`.
    pub fn bbox_targets(&self, gt: ArrayView2<f32>) -> Result<Array2<f32>> {
        ensure_box_array(&gt, "ground-truth array")?;
        let n = self.matched_gt.len();
        if gt.ncols() == 0 {
            return Ok(Array2::zeros((4, n)));
        }

        let mut targets = Array2::<f32>::zeros((4, n));
        for (i, &j) in self.matched_gt.iter().enumerate() {
            for row in 0..4 {
                targets[[row, i]] = gt[[row, j]];
            }
        }
        Ok(targets)
    }
}

/// Assigns ground-truth boxes to references by IoU thresholds.
///
/// A reference is negative when its best IoU falls inside
/// `[neg_iou_lo, neg_iou)`, positive when its best IoU reaches `pos_iou`.
/// Each ground-truth box rescues its single best-matching reference as
/// positive regardless of the thresholds, together with every reference
/// tying that maximum when the maximum is positive. Everything else is
/// ignored.
#[derive(Debug, Clone, CopyGetters)]
pub struct MaxIoUAssigner {
    #[getset(get_copy = "pub")]
    pos_iou: f32,
    #[getset(get_copy = "pub")]
    neg_iou: f32,
    #[getset(get_copy = "pub")]
    neg_iou_lo: f32,
}

impl MaxIoUAssigner {
    pub fn new(cfg: AssignerCfg) -> Result<Self> {
        let AssignerCfg {
            pos_iou,
            neg_iou,
            neg_iou_lo,
        } = cfg;
        ensure!(
            neg_iou_lo <= neg_iou,
            "negative IoU band is empty: [{}, {})",
            neg_iou_lo,
            neg_iou
        );

        Ok(Self {
            pos_iou,
            neg_iou,
            neg_iou_lo,
        })
    }

    pub fn assign(
        &self,
        references: ArrayView2<f32>,
        gt: ArrayView2<f32>,
    ) -> Result<Assignment> {
        ensure_box_array(&references, "reference array")?;
        ensure_box_array(&gt, "ground-truth array")?;

        let n = references.ncols();
        let m = gt.ncols();

        let mut labels = Array1::from_elem(n, -1i32);
        let mut matched_gt = Array1::<usize>::zeros(n);
        let mut max_iou = Array1::<f32>::zeros(n);

        if m == 0 {
            warn!("assigner received no ground truth, labeling all {} references negative", n);
            labels.fill(0);
            return Ok(Assignment {
                labels,
                matched_gt,
                max_iou,
            });
        }

        let table = iou_table(references, gt)?;

        for i in 0..n {
            let (best_j, best) = table
                .row(i)
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bj, bv), (j, &v)| {
                    if v > bv {
                        (j, v)
                    } else {
                        (bj, bv)
                    }
                });
            matched_gt[i] = best_j;
            max_iou[i] = best;
        }

        for i in 0..n {
            if max_iou[i] < self.neg_iou && max_iou[i] >= self.neg_iou_lo {
                labels[i] = 0;
            }
        }
        for i in 0..n {
            if max_iou[i] >= self.pos_iou {
                labels[i] = 1;
            }
        }

        // rescue: each ground truth forces its best reference positive
        for j in 0..m {
            let (best_i, best) = table
                .column(j)
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                });
            labels[best_i] = 1;
            if best > 0.0 {
                for i in 0..n {
                    if table[[i, j]] == best {
                        labels[i] = 1;
                    }
                }
            }
        }

        Ok(Assignment {
            labels,
            matched_gt,
            max_iou,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn cfg(pos: f32, neg: f32) -> AssignerCfg {
        AssignerCfg {
            pos_iou: pos,
            neg_iou: neg,
            neg_iou_lo: 0.0,
        }
    }

    #[test]
    fn rescue_holds_at_unreachable_threshold() -> Result<()> {
        // references: one near miss of the gt, three far away
        let references = arr2(&[
            [8.0, 200.0, 300.0, 400.0],
            [8.0, 200.0, 300.0, 400.0],
            [52.0, 220.0, 320.0, 420.0],
            [52.0, 220.0, 320.0, 420.0],
        ]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);

        let assigner = MaxIoUAssigner::new(cfg(1.01, 0.3))?;
        let assignment = assigner.assign(references.view(), gt.view())?;

        assert_eq!(assignment.labels[0], 1);
        assert_eq!(assignment.matched_gt[0], 0);
        assert_eq!(assignment.labels.slice(s![1..]).to_vec(), vec![0, 0, 0]);
        Ok(())
    }

    #[test]
    fn ties_at_maximum_are_all_positive() -> Result<()> {
        // two identical references tie the best IoU against the gt
        let references = arr2(&[
            [8.0, 8.0, 300.0],
            [8.0, 8.0, 300.0],
            [52.0, 52.0, 320.0],
            [52.0, 52.0, 320.0],
        ]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);

        let assigner = MaxIoUAssigner::new(cfg(0.95, 0.3))?;
        let assignment = assigner.assign(references.view(), gt.view())?;
        assert_eq!(assignment.labels[0], 1);
        assert_eq!(assignment.labels[1], 1);
        assert_eq!(assignment.labels[2], 0);
        Ok(())
    }

    #[test]
    fn thresholds_partition_references() -> Result<()> {
        let references = arr2(&[
            [10.0, 12.0, 20.0, 500.0],
            [10.0, 12.0, 20.0, 500.0],
            [50.0, 52.0, 60.0, 540.0],
            [50.0, 52.0, 60.0, 540.0],
        ]);
        let gt = arr2(&[[10.0], [10.0], [50.0], [50.0]]);

        let assigner = MaxIoUAssigner::new(cfg(0.7, 0.3))?;
        let assignment = assigner.assign(references.view(), gt.view())?;
        // exact match and near match are positive
        assert_eq!(assignment.labels[0], 1);
        assert_eq!(assignment.labels[1], 1);
        // moderate overlap lands in the ignore band
        assert!(assignment.max_iou[2] >= 0.3 && assignment.max_iou[2] < 0.7);
        assert_eq!(assignment.labels[2], -1);
        // the far box is negative
        assert_eq!(assignment.labels[3], 0);
        Ok(())
    }

    #[test]
    fn empty_ground_truth_labels_all_negative() -> Result<()> {
        let references = Array2::<f32>::zeros((4, 100));
        let gt = Array2::<f32>::zeros((4, 0));

        let assigner = MaxIoUAssigner::new(cfg(0.7, 0.3))?;
        let assignment = assigner.assign(references.view(), gt.view())?;
        assert_eq!(assignment.num_negative(), 100);
        assert_eq!(assignment.num_positive(), 0);
        assert!(assignment.matched_gt.iter().all(|&j| j == 0));
        Ok(())
    }

    #[test]
    fn bbox_targets_gather_matched_gt() -> Result<()> {
        let references = arr2(&[
            [8.0, 100.0],
            [8.0, 100.0],
            [52.0, 140.0],
            [52.0, 140.0],
        ]);
        let gt = arr2(&[[10.0, 98.0], [10.0, 98.0], [50.0, 138.0], [50.0, 138.0]]);

        let assigner = MaxIoUAssigner::new(cfg(0.5, 0.3))?;
        let assignment = assigner.assign(references.view(), gt.view())?;
        let targets = assignment.bbox_targets(gt.view())?;
        assert_eq!(targets.column(0).to_vec(), vec![10.0, 10.0, 50.0, 50.0]);
        assert_eq!(targets.column(1).to_vec(), vec![98.0, 98.0, 138.0, 138.0]);
        Ok(())
    }
}
