//! imgopt processing engine
//!
//! Turns an uploaded workbook into an output workbook: locate image URLs per
//! [`ProcessingMode`](imgopt_core::ProcessingMode), optimize each image through an
//! [`ItemProcessor`], and write the new URLs back in place.

pub mod extract;
pub mod image;
pub mod pipeline;
pub mod runner;
pub mod spreadsheet;
pub mod traits;

pub use extract::{extract_urls, ImageCell};
pub use image::{ImageOptimizer, OptimizerSettings};
pub use pipeline::{process_workbook, PipelineOutcome};
pub use runner::{run_items, RunSummary};
pub use spreadsheet::{CellValue, Sheet, SpreadsheetError, Workbook};
pub use traits::ItemProcessor;
