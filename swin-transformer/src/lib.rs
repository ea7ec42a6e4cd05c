//! Swin Transformer image classification on Burn.
//!
//! The model is a stack of stages operating at progressively coarser resolutions. Each
//! stage alternates window attention and shifted window attention blocks and hands its
//! output to the next stage through a 2x2 patch merging.
//!
//! ```text
//! image -> patch embedding -> stage 1 -> merge -> ... -> stage N -> norm -> pool -> head
//! ```
//!
//! Models are built from a [`SwinTransformerConfig`], either directly or through the
//! [`swin_t`], [`swin_s`], [`swin_b`] and [`swin_l`] presets. Construction validates the
//! configuration and returns [`SwinError::Configuration`] on inconsistencies; forward
//! passes return [`SwinError::Shape`] when an input does not tile into patches and
//! windows.

mod config;
mod error;
mod init;
pub mod models;

pub use config::{stochastic_depth_schedule, SwinTransformerConfig};
pub use error::{SwinError, SwinResult};
pub use init::{InitWeights, TruncNormalInit, WeightInitializer};
pub use models::{
    layer::StageOutput,
    transformer::{swin_b, swin_l, swin_s, swin_t, SwinTransformer},
};
