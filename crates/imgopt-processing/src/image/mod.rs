//! Image optimization: fetch, pad to a minimum canvas, re-encode as JPEG, store.

pub mod naming;
mod optimizer;
pub mod pad;

pub use optimizer::{ImageOptimizer, OptimizerSettings};
