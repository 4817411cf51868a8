use crate::common::*;

/// Per-image metadata handed over by the data-loading layer.
///
/// All shapes are `(height, width)` in pixels of the network input space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImgMeta {
    /// Image extent after resizing, before padding.
    pub img_shape: (usize, usize),
    /// Image extent after padding; anchors are laid out over this area.
    pub pad_shape: (usize, usize),
    /// Resize ratio applied to the raw image.
    pub scale_factor: f64,
}

impl ImgMeta {
    pub fn new(img_shape: (usize, usize), pad_shape: (usize, usize), scale_factor: f64) -> Self {
        Self {
            img_shape,
            pad_shape,
            scale_factor,
        }
    }
}
