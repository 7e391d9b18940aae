//! Persistence contracts the lending engine runs against.
//!
//! `PgStore` is the production implementation; tests use an in-memory one.
//! Every guarded transition is a single call so the implementation can make
//! it atomic and report a lost race as [`StoreError::StaleState`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    BuddyRequest, BuddyRequestView, LendingHistoryView, LendingRequest, LendingRequestView,
    LendingStatus, NewLendingRequest, PermissionLevel, RequestDirection, ToolRef, ToolboxAccess,
};
use crate::utils::Pagination;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// A conditional update matched no row because the state moved on.
    #[error("row is no longer in the expected state")]
    StaleState,

    #[error("tool is not available")]
    ToolUnavailable,

    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let constraint = db.constraint().unwrap_or_default().to_string();
                match db.code().as_deref() {
                    Some("23505") => StoreError::UniqueViolation(constraint),
                    Some("23503") => StoreError::ForeignKeyViolation(constraint),
                    _ => StoreError::Backend(db.to_string()),
                }
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_id_by_external_id(&self, external_id: &str) -> StoreResult<Option<Uuid>>;
    async fn user_exists(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn find_toolbox(&self, id: Uuid) -> StoreResult<Option<ToolboxAccess>>;
    /// Symmetric: both directed edges are always written together.
    async fn is_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool>;
    async fn find_grant(&self, toolbox_id: Uuid, user_id: Uuid)
    -> StoreResult<Option<PermissionLevel>>;
}

#[async_trait]
pub trait BuddyStore: Send + Sync {
    /// Pending request from `requester` to `target`, in that direction only.
    async fn find_pending_between(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> StoreResult<Option<BuddyRequest>>;
    async fn insert_buddy_request(&self, requester: Uuid, target: Uuid)
    -> StoreResult<BuddyRequest>;
    async fn find_buddy_request(&self, id: Uuid) -> StoreResult<Option<BuddyRequest>>;
    /// pending -> accepted plus both buddy edges, atomically.
    async fn accept_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest>;
    /// pending -> rejected.
    async fn reject_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest>;
    async fn list_buddy_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        page: Pagination,
    ) -> StoreResult<(Vec<BuddyRequestView>, i64)>;
    /// Removes both directed edges; false if there were none.
    async fn remove_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait LendingStore: Send + Sync {
    async fn find_tool(&self, id: Uuid) -> StoreResult<Option<ToolRef>>;
    async fn has_open_request(&self, tool_id: Uuid, requester_id: Uuid) -> StoreResult<bool>;
    async fn insert_lending_request(&self, new: NewLendingRequest) -> StoreResult<LendingRequest>;
    async fn find_lending_request(&self, id: Uuid) -> StoreResult<Option<LendingRequest>>;
    /// pending -> active; marks the tool unavailable and opens a history row.
    /// Fails with `ToolUnavailable` if the tool is already lent out.
    async fn approve_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest>;
    /// pending -> denied; touches nothing else.
    async fn deny_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest>;
    /// active -> returned; closes the history row and recomputes availability.
    async fn return_lending_request(&self, id: Uuid) -> StoreResult<LendingRequest>;
    async fn list_lending_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        status: Option<LendingStatus>,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingRequestView>, i64)>;
    async fn list_lending_history(
        &self,
        user_id: Uuid,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingHistoryView>, i64)>;
}

/// Everything the engine needs, as one injectable object.
pub trait CoreStore: UserDirectory + AccessStore + BuddyStore + LendingStore {}

impl<T> CoreStore for T where T: UserDirectory + AccessStore + BuddyStore + LendingStore {}
