//! Classification and regression losses over sampled targets.
//!
//! Every loss reduces by sum; dividing by a sample or positive count is the
//! caller's contract. A loss over zero entries is a well-defined `0.0`, not
//! an error, so pathological images keep the training loop alive.

use crate::{common::*, geometry::elem_iou, utils::one_hot};

/// Named scalar losses handed back to the trainer, which sums them.
pub type NamedLosses = IndexMap<String, f64>;

fn bce_with_logits(x: f32, t: f32) -> f32 {
    // numerically stable binary cross entropy on logits
    x.max(0.0) - x * t + (-x.abs()).exp().ln_1p()
}

/// Cross-entropy loss initializer.
#[derive(Debug, Clone)]
pub struct CrossEntropyLossInit {
    /// Use per-class sigmoid instead of softmax over channels.
    pub use_sigmoid: bool,
    pub loss_weight: f64,
}

impl Default for CrossEntropyLossInit {
    fn default() -> Self {
        Self {
            use_sigmoid: false,
            loss_weight: 1.0,
        }
    }
}

impl CrossEntropyLossInit {
    pub fn build(self) -> CrossEntropyLoss {
        let Self {
            use_sigmoid,
            loss_weight,
        } = self;
        CrossEntropyLoss {
            use_sigmoid,
            loss_weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    use_sigmoid: bool,
    loss_weight: f64,
}

impl CrossEntropyLoss {
    /// Sum of cross entropies of `logits [C, N]` against `labels [N]`.
    ///
    /// With softmax, labels index the channel dimension directly. With
    /// sigmoid, channel `c` stands for class `c + 1` and label 0 means
    /// background (all-zero target row).
    pub fn forward(&self, logits: ArrayView2<f32>, labels: ArrayView1<i64>) -> Result<f64> {
        ensure!(
            logits.ncols() == labels.len(),
            "logits and labels disagree: {} columns, {} labels",
            logits.ncols(),
            labels.len()
        );

        if labels.is_empty() {
            warn!("cross-entropy loss received no samples, returning zero");
            return Ok(0.0);
        }

        let num_classes = logits.nrows();
        let loss: f64 = if self.use_sigmoid {
            let targets = one_hot_dropping_background(labels, num_classes)?;
            izip!(logits.iter(), targets.iter())
                .map(|(&x, &t)| bce_with_logits(x, t) as f64)
                .sum()
        } else {
            let mut sum = 0.0f64;
            for (col, &label) in izip!(logits.axis_iter(Axis(1)), labels.iter()) {
                ensure!(
                    (0..num_classes as i64).contains(&label),
                    "label {} out of range for {} channels",
                    label,
                    num_classes
                );
                let max = col.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let lse = max + col.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
                sum += (lse - col[label as usize]) as f64;
            }
            sum
        };
        Ok(loss * self.loss_weight)
    }
}

/// Sigmoid focal loss initializer.
#[derive(Debug, Clone)]
pub struct FocalLossInit {
    pub alpha: f64,
    pub gamma: f64,
    pub loss_weight: f64,
}

impl Default for FocalLossInit {
    fn default() -> Self {
        Self {
            alpha: 0.25,
            gamma: 2.0,
            loss_weight: 1.0,
        }
    }
}

impl FocalLossInit {
    pub fn build(self) -> Result<FocalLoss> {
        let Self {
            alpha,
            gamma,
            loss_weight,
        } = self;
        ensure!(gamma >= 0.0, "focal loss gamma must be non-negative");
        Ok(FocalLoss {
            alpha: alpha as f32,
            gamma: gamma as f32,
            loss_weight,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FocalLoss {
    alpha: f32,
    gamma: f32,
    loss_weight: f64,
}

impl FocalLoss {
    /// Sum of sigmoid focal losses of `logits [C, N]` against `labels [N]`,
    /// where label 0 is background.
    pub fn forward(&self, logits: ArrayView2<f32>, labels: ArrayView1<i64>) -> Result<f64> {
        ensure!(
            logits.ncols() == labels.len(),
            "logits and labels disagree: {} columns, {} labels",
            logits.ncols(),
            labels.len()
        );

        if labels.is_empty() {
            warn!("focal loss received no samples, returning zero");
            return Ok(0.0);
        }

        let targets = one_hot_dropping_background(labels, logits.nrows())?;
        let loss: f64 = izip!(logits.iter(), targets.iter())
            .map(|(&x, &t)| {
                let prob = 1.0 / (1.0 + (-x).exp());
                let p_t = prob * t + (1.0 - prob) * (1.0 - t);
                let alpha_factor = self.alpha * t + (1.0 - self.alpha) * (1.0 - t);
                let weight = alpha_factor * (1.0 - p_t).powf(self.gamma);
                (weight * bce_with_logits(x, t)) as f64
            })
            .sum();
        Ok(loss * self.loss_weight)
    }
}

/// Smooth-L1 loss initializer.
#[derive(Debug, Clone)]
pub struct SmoothL1LossInit {
    /// Transition point: quadratic below, linear above.
    pub beta: f64,
    pub loss_weight: f64,
}

impl Default for SmoothL1LossInit {
    fn default() -> Self {
        Self {
            beta: 1.0,
            loss_weight: 1.0,
        }
    }
}

impl SmoothL1LossInit {
    pub fn build(self) -> Result<SmoothL1Loss> {
        let Self { beta, loss_weight } = self;
        ensure!(beta > 0.0, "smooth-l1 beta must be positive");
        Ok(SmoothL1Loss {
            beta: beta as f32,
            loss_weight,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SmoothL1Loss {
    beta: f32,
    loss_weight: f64,
}

impl SmoothL1Loss {
    /// Sum of elementwise Huber terms between equally shaped arrays.
    pub fn forward(&self, pred: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f64> {
        ensure!(
            pred.dim() == target.dim(),
            "prediction and target shapes differ: {:?} vs {:?}",
            pred.dim(),
            target.dim()
        );

        if pred.is_empty() {
            warn!("smooth-l1 loss received no samples, returning zero");
            return Ok(0.0);
        }

        let beta = self.beta;
        let loss: f64 = izip!(pred.iter(), target.iter())
            .map(|(&x, &y)| {
                let diff = (x - y).abs();
                let val = if diff < beta {
                    diff * diff / (2.0 * beta)
                } else {
                    diff - 0.5 * beta
                };
                val as f64
            })
            .sum();
        Ok(loss * self.loss_weight)
    }
}

/// Negative-log-IoU loss initializer.
#[derive(Debug, Clone)]
pub struct IouLossInit {
    pub loss_weight: f64,
}

impl Default for IouLossInit {
    fn default() -> Self {
        Self { loss_weight: 1.0 }
    }
}

impl IouLossInit {
    pub fn build(self) -> IouLoss {
        IouLoss {
            loss_weight: self.loss_weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IouLoss {
    loss_weight: f64,
}

impl IouLoss {
    /// Sum of `-ln(IoU)` over paired `[4, N]` box arrays.
    pub fn forward(&self, pred: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f64> {
        if pred.ncols() == 0 && target.ncols() == 0 {
            warn!("iou loss received no samples, returning zero");
            return Ok(0.0);
        }

        let iou = elem_iou(pred, target)?;
        let loss: f64 = iou.iter().map(|&v| -(v as f64).ln()).sum();
        Ok(loss * self.loss_weight)
    }
}

fn one_hot_dropping_background(labels: ArrayView1<i64>, num_classes: usize) -> Result<Array2<f32>> {
    // labels live in 0..=C with 0 reserved for background
    let full = one_hot(labels, num_classes + 1)?;
    Ok(full.slice(s![1.., ..]).to_owned())
}

/// Classification loss selection; unknown `type` names fail at
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClsLossCfg {
    #[serde(rename = "CrossEntropyLoss")]
    CrossEntropy {
        #[serde(default)]
        use_sigmoid: bool,
        #[serde(default = "default_loss_weight")]
        loss_weight: f64,
    },
    #[serde(rename = "FocalLoss")]
    Focal {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_gamma")]
        gamma: f64,
        #[serde(default = "default_loss_weight")]
        loss_weight: f64,
    },
}

impl ClsLossCfg {
    pub fn build(self) -> Result<ClsLoss> {
        let loss = match self {
            ClsLossCfg::CrossEntropy {
                use_sigmoid,
                loss_weight,
            } => ClsLoss::CrossEntropy(
                CrossEntropyLossInit {
                    use_sigmoid,
                    loss_weight,
                }
                .build(),
            ),
            ClsLossCfg::Focal {
                alpha,
                gamma,
                loss_weight,
            } => ClsLoss::Focal(
                FocalLossInit {
                    alpha,
                    gamma,
                    loss_weight,
                }
                .build()?,
            ),
        };
        Ok(loss)
    }
}

#[derive(Debug, Clone)]
pub enum ClsLoss {
    CrossEntropy(CrossEntropyLoss),
    Focal(FocalLoss),
}

impl ClsLoss {
    pub fn forward(&self, logits: ArrayView2<f32>, labels: ArrayView1<i64>) -> Result<f64> {
        match self {
            ClsLoss::CrossEntropy(loss) => loss.forward(logits, labels),
            ClsLoss::Focal(loss) => loss.forward(logits, labels),
        }
    }
}

/// Regression loss selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegLossCfg {
    #[serde(rename = "SmoothL1Loss")]
    SmoothL1 {
        #[serde(default = "default_beta")]
        beta: f64,
        #[serde(default = "default_loss_weight")]
        loss_weight: f64,
    },
    #[serde(rename = "IoULoss")]
    Iou {
        #[serde(default = "default_loss_weight")]
        loss_weight: f64,
    },
}

impl RegLossCfg {
    pub fn build(self) -> Result<RegLoss> {
        let loss = match self {
            RegLossCfg::SmoothL1 { beta, loss_weight } => {
                RegLoss::SmoothL1(SmoothL1LossInit { beta, loss_weight }.build()?)
            }
            RegLossCfg::Iou { loss_weight } => RegLoss::Iou(IouLossInit { loss_weight }.build()),
        };
        Ok(loss)
    }
}

#[derive(Debug, Clone)]
pub enum RegLoss {
    SmoothL1(SmoothL1Loss),
    Iou(IouLoss),
}

impl RegLoss {
    pub fn forward(&self, pred: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f64> {
        match self {
            RegLoss::SmoothL1(loss) => loss.forward(pred, target),
            RegLoss::Iou(loss) => loss.forward(pred, target),
        }
    }
}

fn default_loss_weight() -> f64 {
    1.0
}

fn default_alpha() -> f64 {
    0.25
}

fn default_gamma() -> f64 {
    2.0
}

fn default_beta() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn softmax_ce_matches_hand_computation() -> Result<()> {
        let logits = arr2(&[[2.0, 0.0], [0.0, 1.0]]);
        let labels = arr1(&[0i64, 0]);
        let loss = CrossEntropyLossInit::default().build();
        let got = loss.forward(logits.view(), labels.view())?;

        let expect = ((1.0f64 + (-2.0f64).exp()).ln()) + ((1.0f64 + 1.0f64.exp()).ln());
        assert_abs_diff_eq!(got, expect, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn empty_batch_returns_zero_loss() -> Result<()> {
        let logits = Array2::<f32>::zeros((3, 0));
        let labels = Array1::<i64>::zeros(0);

        let ce = CrossEntropyLossInit::default().build();
        assert_eq!(ce.forward(logits.view(), labels.view())?, 0.0);

        let focal = FocalLossInit::default().build()?;
        assert_eq!(focal.forward(logits.view(), labels.view())?, 0.0);

        let reg = SmoothL1LossInit::default().build()?;
        let empty = Array2::<f32>::zeros((4, 0));
        assert_eq!(reg.forward(empty.view(), empty.view())?, 0.0);
        Ok(())
    }

    #[test]
    fn smooth_l1_is_continuous_at_beta() -> Result<()> {
        let beta = 0.5f64;
        let loss = SmoothL1LossInit {
            beta,
            loss_weight: 1.0,
        }
        .build()?;

        let below = loss.forward(
            arr2(&[[beta as f32 - 1e-4]]).view(),
            arr2(&[[0.0f32]]).view(),
        )?;
        let above = loss.forward(
            arr2(&[[beta as f32 + 1e-4]]).view(),
            arr2(&[[0.0f32]]).view(),
        )?;
        assert_abs_diff_eq!(below, beta / 2.0, epsilon = 1e-3);
        assert_abs_diff_eq!(above, beta / 2.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn smooth_l1_is_quadratic_below_and_linear_above() -> Result<()> {
        let loss = SmoothL1LossInit::default().build()?;
        let got = loss.forward(arr2(&[[0.5f32, 3.0]]).view(), arr2(&[[0.0f32, 0.0]]).view())?;
        // 0.5^2 / 2 + (3 - 0.5)
        assert_abs_diff_eq!(got, 0.125 + 2.5, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn focal_loss_downweights_easy_negatives() -> Result<()> {
        let loss = FocalLossInit::default().build()?;
        // one confident background column, one hard positive column
        let easy = arr2(&[[-10.0f32], [-10.0]]);
        let hard = arr2(&[[-10.0f32], [10.0]]);
        let bg = arr1(&[0i64]);
        let pos = arr1(&[1i64]);

        let easy_loss = loss.forward(easy.view(), bg.view())?;
        let miss_loss = loss.forward(easy.view(), pos.view())?;
        assert!(easy_loss < 1e-3);
        assert!(miss_loss > 1.0);

        let hit_loss = loss.forward(hard.view(), arr1(&[2i64]).view())?;
        assert!(hit_loss < 1e-3);
        Ok(())
    }

    #[test]
    fn sigmoid_ce_treats_label_zero_as_background() -> Result<()> {
        let loss = CrossEntropyLossInit {
            use_sigmoid: true,
            loss_weight: 1.0,
        }
        .build();
        // strongly negative logits fit an all-background batch
        let logits = arr2(&[[-12.0f32, -12.0], [-12.0, -12.0]]);
        let labels = arr1(&[0i64, 0]);
        let got = loss.forward(logits.view(), labels.view())?;
        assert!(got < 1e-3);
        Ok(())
    }

    #[test]
    fn iou_loss_is_zero_for_perfect_match() -> Result<()> {
        let boxes = arr2(&[[10.0], [10.0], [50.0], [50.0]]);
        let loss = IouLossInit::default().build();
        let got = loss.forward(boxes.view(), boxes.view())?;
        assert_abs_diff_eq!(got, 0.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn loss_cfg_builds_typed_variants() -> Result<()> {
        let cls: ClsLossCfg = serde_json::from_str(
            r#"{"type": "FocalLoss", "alpha": 0.25, "gamma": 2.0, "loss_weight": 1.0}"#,
        )?;
        assert!(matches!(cls.build()?, ClsLoss::Focal(_)));

        let reg: RegLossCfg = serde_json::from_str(r#"{"type": "SmoothL1Loss", "beta": 0.111}"#)?;
        assert!(matches!(reg.build()?, RegLoss::SmoothL1(_)));

        let unknown = serde_json::from_str::<ClsLossCfg>(r#"{"type": "BalancedL1Loss"}"#);
        assert!(unknown.is_err());
        Ok(())
    }

    #[test]
    fn named_losses_collect_components() -> Result<()> {
        let mut losses = NamedLosses::new();
        losses.insert("cls_loss".into(), 1.5);
        losses.insert("reg_loss".into(), 0.5);
        let total: f64 = losses.values().sum();
        assert_abs_diff_eq!(total, 2.0);
        Ok(())
    }
}
