//! imgopt API library
//!
//! HTTP handlers, the session guard and application setup. The binary in `main.rs`
//! only loads configuration and calls into [`setup`].

mod handlers;
mod services;
mod task_handlers;
mod utils;

pub mod api_doc;
pub mod auth;
pub mod constants;
pub mod error;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use task_handlers::WorkbookBatchHandler;
