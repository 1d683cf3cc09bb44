//! imgopt data layer
//!
//! Batches and admin settings are held in memory behind a single lock each, which
//! keeps the dashboard's polling reads cheap, and every mutation is written through
//! to one JSON record per entity so state survives restarts.

pub mod db;

pub use db::{
    BatchLease, BatchRepository, DeleteOutcome, LeaseOutcome, SettingsRepository,
    MAX_LIST_LIMIT,
};
