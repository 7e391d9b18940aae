use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::LendingStatus;
use crate::utils::PaginationQuery;

#[derive(Debug, Default, Deserialize)]
pub struct CreateLendingRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateLendingResponse {
    pub id: Uuid,
    pub status: LendingStatus,
    pub message: &'static str,
}

/// `approve` stays optional so a missing flag is our 400, not a
/// deserialization error.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub approve: Option<bool>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LendingListQuery {
    pub status: Option<String>,
    #[serde(flatten)]
    pub page: PaginationQuery,
}

impl LendingListQuery {
    /// Unknown status values are ignored rather than rejected.
    pub fn status(&self) -> Option<LendingStatus> {
        self.status.as_deref().and_then(LendingStatus::parse)
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
