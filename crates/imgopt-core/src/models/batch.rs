use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

pub type BatchId = Uuid;

/// Lifecycle status of a batch.
///
/// ```text
/// uploaded -> queued -> processing -> { done, failed, cancelled }
/// any non-terminal state -> deleted
/// ```
///
/// `done`, `failed`, `cancelled` and `deleted` are terminal: nothing leaves them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Uploaded,
    Queued,
    Processing,
    Done,
    Failed,
    Cancelled,
    Deleted,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Done | BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Deleted
        )
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    ///
    /// `uploaded -> failed` and `queued -> failed` exist so that records left in an
    /// inconsistent state by a crash can be closed out on startup.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (Uploaded, Queued) => true,
            (Queued, Processing) => true,
            (Processing, Done | Failed | Cancelled) => true,
            (Uploaded | Queued, Failed) => true,
            (from, Deleted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Done => "done",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Deleted => "deleted",
        }
    }
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(BatchStatus::Uploaded),
            "queued" => Ok(BatchStatus::Queued),
            "processing" => Ok(BatchStatus::Processing),
            "done" => Ok(BatchStatus::Done),
            "failed" => Ok(BatchStatus::Failed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            "deleted" => Ok(BatchStatus::Deleted),
            _ => Err(anyhow::anyhow!("Invalid batch status: {}", s)),
        }
    }
}

/// How image URLs are located in the uploaded workbook.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum ProcessingMode {
    /// Column A, every row after the header.
    #[default]
    #[serde(rename = "A")]
    SingleColumn,
    /// Every column whose header is `PICTURE_<n>`.
    #[serde(rename = "table")]
    PictureColumns,
}

impl ProcessingMode {
    /// Parse the `mode` form field sent by the upload form.
    ///
    /// Anything starting with `a` selects [`ProcessingMode::SingleColumn`], `table`
    /// selects [`ProcessingMode::PictureColumns`]; an empty value is the default.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() || normalized.starts_with('a') {
            Ok(ProcessingMode::SingleColumn)
        } else if normalized == "table" {
            Ok(ProcessingMode::PictureColumns)
        } else {
            Err(AppError::InvalidInput(format!(
                "Unknown processing mode '{}'. Expected 'A' or 'table'",
                value.trim()
            )))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::SingleColumn => "A",
            ProcessingMode::PictureColumns => "table",
        }
    }
}

impl Display for ProcessingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// One uploaded spreadsheet and its processing job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Batch {
    #[schema(value_type = Uuid)]
    pub id: BatchId,
    pub status: BatchStatus,
    pub total: u64,
    pub processed: u64,
    /// Items whose image could not be fetched or converted. They keep their original
    /// URL in the output and still count towards `processed`.
    #[serde(default)]
    pub failed_items: u64,
    pub original_filename: String,
    pub mode: ProcessingMode,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Parallelism pinned when a worker dequeued the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Storage key of the output workbook; only set once the batch is done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Batch {
    pub fn new(
        id: BatchId,
        original_filename: impl Into<String>,
        mode: ProcessingMode,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: BatchStatus::Uploaded,
            total: 0,
            processed: 0,
            failed_items: 0,
            original_filename: original_filename.into(),
            mode,
            created_at,
            started_at: None,
            finished_at: None,
            threads: None,
            result_zip: None,
            error: None,
        }
    }

    /// Terminal batches older than the retention window may be purged.
    pub fn is_purge_eligible(&self, retention_days: u32, now: DateTime<Utc>) -> bool {
        self.status.is_terminal()
            && now.signed_duration_since(self.created_at) > Duration::days(retention_days as i64)
    }
}

/// Response body of `GET /api/batches`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchListResponse {
    pub batches: Vec<Batch>,
}

/// Response body of `POST /api/batches`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateBatchResponse {
    pub ok: bool,
    #[schema(value_type = Uuid)]
    pub id: BatchId,
}
