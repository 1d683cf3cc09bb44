use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Upper bound for the worker pool size.
pub const MAX_WORKERS: usize = 64;

/// Upper bound for per-batch item parallelism.
pub const MAX_THREADS_PER_BATCH: usize = 64;

/// Runtime-adjustable knobs changed from the admin panel.
///
/// Readers always work on a copy taken under the settings lock, so a worker that
/// pinned `threads_per_batch` for a batch is unaffected by later changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct AdminSettings {
    pub desired_workers: usize,
    pub threads_per_batch: usize,
    pub retention_days: u32,
    pub auto_purge: bool,
}

impl AdminSettings {
    pub fn validate_desired_workers(n: usize) -> Result<usize, AppError> {
        if n > MAX_WORKERS {
            return Err(AppError::InvalidInput(format!(
                "Worker count must be between 0 and {}",
                MAX_WORKERS
            )));
        }
        Ok(n)
    }

    pub fn validate_threads_per_batch(n: usize) -> Result<usize, AppError> {
        if n == 0 || n > MAX_THREADS_PER_BATCH {
            return Err(AppError::InvalidInput(format!(
                "Thread count must be between 1 and {}",
                MAX_THREADS_PER_BATCH
            )));
        }
        Ok(n)
    }

    /// Clamp values loaded from the environment or from disk into their valid ranges.
    pub fn sanitized(self) -> Self {
        Self {
            desired_workers: self.desired_workers.min(MAX_WORKERS),
            threads_per_batch: self.threads_per_batch.clamp(1, MAX_THREADS_PER_BATCH),
            retention_days: self.retention_days,
            auto_purge: self.auto_purge,
        }
    }
}

/// Parse the `{flag}` segment of `/api/admin/auto-purge/{flag}`.
pub fn parse_flag(value: &str) -> Result<bool, AppError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::InvalidInput(format!(
            "Invalid flag '{}'. Expected true or false",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_must_be_positive() {
        assert!(AdminSettings::validate_threads_per_batch(0).is_err());
        assert_eq!(AdminSettings::validate_threads_per_batch(8).unwrap(), 8);
        assert!(AdminSettings::validate_threads_per_batch(MAX_THREADS_PER_BATCH + 1).is_err());
    }

    #[test]
    fn zero_workers_is_allowed() {
        assert_eq!(AdminSettings::validate_desired_workers(0).unwrap(), 0);
        assert!(AdminSettings::validate_desired_workers(MAX_WORKERS + 1).is_err());
    }

    #[test]
    fn sanitized_clamps_out_of_range_values() {
        let settings = AdminSettings {
            desired_workers: 1000,
            threads_per_batch: 0,
            retention_days: 7,
            auto_purge: true,
        }
        .sanitized();
        assert_eq!(settings.desired_workers, MAX_WORKERS);
        assert_eq!(settings.threads_per_batch, 1);
        assert_eq!(settings.retention_days, 7);
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag("ON").unwrap());
        assert!(!parse_flag("false").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
