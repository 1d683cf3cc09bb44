//! Background processing for the image optimizer.
//!
//! [`WorkerPool`] keeps the admin-chosen number of workers alive, each pulling the
//! oldest queued batch and handing it to a [`BatchHandler`]. [`RetentionSweeper`]
//! removes expired batches on a timer and on demand.

pub mod context;
pub mod pool;
pub mod sweeper;

pub use context::{BatchHandler, BatchOutcome};
pub use pool::{PoolConfig, PoolStatus, WorkerPool};
pub use sweeper::RetentionSweeper;
