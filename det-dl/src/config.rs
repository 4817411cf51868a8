//! By-value configuration types.
//!
//! Every component receives its configuration struct in its constructor;
//! there is no global configuration state in this crate.

use crate::common::*;

/// IoU thresholds for [`MaxIoUAssigner`](crate::assign::MaxIoUAssigner).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssignerCfg {
    /// References with best IoU at or above this value are positive.
    pub pos_iou: f32,
    /// References with best IoU below this value are negative.
    pub neg_iou: f32,
    /// Lower bound of the negative IoU band, `[neg_iou_lo, neg_iou)`.
    #[serde(default)]
    pub neg_iou_lo: f32,
}

/// Positive/total caps for [`RandomSampler`](crate::sample::RandomSampler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerCfg {
    pub max_pos: usize,
    pub max_total: usize,
}

/// Knobs of the first-stage proposal decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposalCfg {
    pub pre_nms: usize,
    pub post_nms: usize,
    pub nms_iou: f32,
    /// Minimum proposal extent in pixels, scaled by the image scale factor.
    pub min_size: f32,
}

/// Affine normalization applied to regression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetNorm {
    pub means: [f32; 4],
    pub stds: [f32; 4],
}

impl Default for TargetNorm {
    fn default() -> Self {
        Self {
            means: [0.0; 4],
            stds: [1.0; 4],
        }
    }
}

/// Test-time decoding knobs shared by the dense detection heads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestCfg {
    /// Per-level candidate cap before NMS; 0 disables the cap.
    pub pre_nms: usize,
    pub min_bbox_size: f32,
    pub min_score: f32,
    pub nms_iou: f32,
    #[serde(default)]
    pub nms_mode: NmsMode,
    pub max_per_img: usize,
}

/// Multi-class NMS policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NmsMode {
    /// A box may appear under every qualifying class channel.
    Official,
    /// A box carries exactly one label, its best-scoring class.
    Strict,
}

impl Default for NmsMode {
    fn default() -> Self {
        NmsMode::Official
    }
}

impl FromStr for NmsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "official" => Ok(NmsMode::Official),
            "strict" => Ok(NmsMode::Strict),
            _ => bail!("unknown nms mode '{}'", s),
        }
    }
}
