pub mod admin;
pub mod batches;
pub mod health;
pub mod images;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Acknowledgement body of mutating endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
