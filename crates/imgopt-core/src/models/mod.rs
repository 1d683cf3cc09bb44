//! Data models shared across the workspace.

mod batch;
mod settings;

pub use batch::*;
pub use settings::*;
