//! Region-proposal and target-assignment core for object detection.
//!
//! The crate covers the geometry-heavy pipeline shared by two-stage and
//! dense detectors: anchor/grid generation, IoU-based target assignment,
//! balanced sampling, box regression coding, proposal/detection decoding,
//! multi-class NMS and the losses consuming the sampled targets. Network
//! execution, gradients and data loading live outside; everything here
//! operates on plain `[4, N]`-style `ndarray` buffers, one image at a time.

mod common;

pub mod config;
pub use config::*;

pub mod meta;
pub use meta::*;

pub mod geometry;
pub use geometry::*;

pub mod anchor;
pub use anchor::*;

pub mod assign;
pub use assign::*;

pub mod sample;
pub use sample::*;

pub mod codec;
pub use codec::*;

pub mod point;
pub use point::*;

pub mod proposal;
pub use proposal::*;

pub mod nms;
pub use nms::*;

pub mod loss;
pub use loss::*;

pub mod utils;
