//! imgopt Core Library
//!
//! This crate provides the domain models, error types and configuration that are
//! shared by the batch store, the processing engine, the worker pool and the API.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{BaseConfig, Config, ProcessorConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    AdminSettings, Batch, BatchId, BatchListResponse, BatchStatus, CreateBatchResponse,
    ProcessingMode,
};
