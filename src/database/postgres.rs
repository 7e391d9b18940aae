//! Postgres implementation of the engine's store ports.
//!
//! Transitions are conditional updates (`WHERE status = ...`) checked for a
//! returned row; multi-row transitions run in one transaction that rolls
//! back on drop when a step fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::models::{
    BuddyRequest, BuddyRequestStatus, BuddyRequestView, LendingHistoryView, LendingRequest,
    LendingRequestView, LendingStatus, NewLendingRequest, PermissionLevel, RequestDirection,
    ToolRef, ToolSummary, ToolboxAccess, UserSummary,
};
use crate::domain::ports::{
    AccessStore, BuddyStore, LendingStore, StoreError, StoreResult, UserDirectory,
};
use crate::utils::Pagination;

const LENDING_COLUMNS: &str = "id, tool_id, requester_id, owner_id, status, message, \
     response_message, requested_at, responded_at";
const BUDDY_REQUEST_COLUMNS: &str =
    "id, requester_id, target_id, status, created_at, responded_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct LendingRequestRow {
    id: Uuid,
    status: LendingStatus,
    message: Option<String>,
    response_message: Option<String>,
    requested_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    tool_id: Uuid,
    tool_name: String,
    tool_description: Option<String>,
    requester_id: Uuid,
    requester_username: String,
    requester_display_name: Option<String>,
    requester_avatar_url: Option<String>,
    owner_id: Uuid,
    owner_username: String,
    owner_display_name: Option<String>,
    owner_avatar_url: Option<String>,
}

impl From<LendingRequestRow> for LendingRequestView {
    fn from(row: LendingRequestRow) -> Self {
        LendingRequestView {
            id: row.id,
            status: row.status,
            message: row.message,
            response_message: row.response_message,
            requested_at: row.requested_at,
            responded_at: row.responded_at,
            tool: ToolSummary {
                id: row.tool_id,
                name: row.tool_name,
                description: row.tool_description,
            },
            requester: UserSummary {
                id: row.requester_id,
                username: row.requester_username,
                display_name: row.requester_display_name,
                avatar_url: row.requester_avatar_url,
            },
            owner: UserSummary {
                id: row.owner_id,
                username: row.owner_username,
                display_name: row.owner_display_name,
                avatar_url: row.owner_avatar_url,
            },
        }
    }
}

#[derive(FromRow)]
struct BuddyRequestRow {
    id: Uuid,
    status: BuddyRequestStatus,
    created_at: DateTime<Utc>,
    user_id: Uuid,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<BuddyRequestRow> for BuddyRequestView {
    fn from(row: BuddyRequestRow) -> Self {
        BuddyRequestView {
            id: row.id,
            status: row.status,
            created_at: row.created_at,
            user: UserSummary {
                id: row.user_id,
                username: row.username,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
            },
        }
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user_id_by_external_id(&self, external_id: &str) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE external_auth_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn user_exists(&self, id: Uuid) -> StoreResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn find_toolbox(&self, id: Uuid) -> StoreResult<Option<ToolboxAccess>> {
        let toolbox = sqlx::query_as::<_, ToolboxAccess>(
            "SELECT id, user_id AS owner_id, visibility FROM toolboxes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(toolbox)
    }

    async fn is_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM buddies WHERE user_id = $1 AND buddy_id = $2)",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn find_grant(
        &self,
        toolbox_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<PermissionLevel>> {
        let level = sqlx::query_scalar::<_, PermissionLevel>(
            "SELECT permission_level FROM toolbox_permissions \
             WHERE toolbox_id = $1 AND user_id = $2",
        )
        .bind(toolbox_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(level)
    }
}

#[async_trait]
impl BuddyStore for PgStore {
    async fn find_pending_between(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> StoreResult<Option<BuddyRequest>> {
        let sql = format!(
            "SELECT {BUDDY_REQUEST_COLUMNS} FROM buddy_requests \
             WHERE requester_id = $1 AND target_id = $2 AND status = 'pending'"
        );
        let request = sqlx::query_as::<_, BuddyRequest>(&sql)
            .bind(requester)
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn insert_buddy_request(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> StoreResult<BuddyRequest> {
        let sql = format!(
            "INSERT INTO buddy_requests (requester_id, target_id) VALUES ($1, $2) \
             RETURNING {BUDDY_REQUEST_COLUMNS}"
        );
        let request = sqlx::query_as::<_, BuddyRequest>(&sql)
            .bind(requester)
            .bind(target)
            .fetch_one(&self.pool)
            .await?;
        Ok(request)
    }

    async fn find_buddy_request(&self, id: Uuid) -> StoreResult<Option<BuddyRequest>> {
        let sql = format!("SELECT {BUDDY_REQUEST_COLUMNS} FROM buddy_requests WHERE id = $1");
        let request = sqlx::query_as::<_, BuddyRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn accept_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE buddy_requests SET status = 'accepted', responded_at = now() \
             WHERE id = $1 AND status = 'pending' RETURNING {BUDDY_REQUEST_COLUMNS}"
        );
        let request = sqlx::query_as::<_, BuddyRequest>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::StaleState)?;

        sqlx::query(
            "INSERT INTO buddies (user_id, buddy_id) VALUES ($1, $2), ($2, $1) \
             ON CONFLICT DO NOTHING",
        )
        .bind(request.requester_id)
        .bind(request.target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn reject_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest> {
        let sql = format!(
            "UPDATE buddy_requests SET status = 'rejected', responded_at = now() \
             WHERE id = $1 AND status = 'pending' RETURNING {BUDDY_REQUEST_COLUMNS}"
        );
        sqlx::query_as::<_, BuddyRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::StaleState)
    }

    async fn list_buddy_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        page: Pagination,
    ) -> StoreResult<(Vec<BuddyRequestView>, i64)> {
        // (column matching the caller, column naming the other party)
        let (mine, other) = match direction {
            RequestDirection::Incoming => ("target_id", "requester_id"),
            RequestDirection::Outgoing => ("requester_id", "target_id"),
        };

        let sql = format!(
            "SELECT br.id, br.status, br.created_at, \
                    u.id AS user_id, u.username, u.display_name, u.avatar_url \
             FROM buddy_requests br \
             JOIN users u ON u.id = br.{other} \
             WHERE br.{mine} = $1 AND br.status = 'pending' \
             ORDER BY br.created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, BuddyRequestRow>(&sql)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM buddy_requests WHERE {mine} = $1 AND status = 'pending'"
        );
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    async fn remove_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM buddies \
             WHERE (user_id = $1 AND buddy_id = $2) OR (user_id = $2 AND buddy_id = $1)",
        )
        .bind(a)
        .bind(b)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LendingStore for PgStore {
    async fn find_tool(&self, id: Uuid) -> StoreResult<Option<ToolRef>> {
        let tool = sqlx::query_as::<_, ToolRef>(
            "SELECT id, toolbox_id, is_available FROM tools WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tool)
    }

    async fn has_open_request(&self, tool_id: Uuid, requester_id: Uuid) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM lending_requests \
             WHERE tool_id = $1 AND requester_id = $2 AND status IN ('pending', 'active'))",
        )
        .bind(tool_id)
        .bind(requester_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_lending_request(&self, new: NewLendingRequest) -> StoreResult<LendingRequest> {
        let sql = format!(
            "INSERT INTO lending_requests (tool_id, requester_id, owner_id, message) \
             VALUES ($1, $2, $3, $4) RETURNING {LENDING_COLUMNS}"
        );
        let request = sqlx::query_as::<_, LendingRequest>(&sql)
            .bind(new.tool_id)
            .bind(new.requester_id)
            .bind(new.owner_id)
            .bind(new.message)
            .fetch_one(&self.pool)
            .await?;
        Ok(request)
    }

    async fn find_lending_request(&self, id: Uuid) -> StoreResult<Option<LendingRequest>> {
        let sql = format!("SELECT {LENDING_COLUMNS} FROM lending_requests WHERE id = $1");
        let request = sqlx::query_as::<_, LendingRequest>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn approve_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE lending_requests \
             SET status = 'active', responded_at = now(), response_message = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {LENDING_COLUMNS}"
        );
        let request = sqlx::query_as::<_, LendingRequest>(&sql)
            .bind(id)
            .bind(response_message)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::StaleState)?;

        let flipped = sqlx::query(
            "UPDATE tools SET is_available = false, updated_at = now() \
             WHERE id = $1 AND is_available = true",
        )
        .bind(request.tool_id)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            return Err(StoreError::ToolUnavailable);
        }

        sqlx::query(
            "INSERT INTO lending_history \
                 (tool_id, tool_name, borrower_id, owner_id, lending_request_id) \
             SELECT t.id, t.name, $2, $3, $4 FROM tools t WHERE t.id = $1",
        )
        .bind(request.tool_id)
        .bind(request.requester_id)
        .bind(request.owner_id)
        .bind(request.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn deny_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest> {
        let sql = format!(
            "UPDATE lending_requests \
             SET status = 'denied', responded_at = now(), response_message = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {LENDING_COLUMNS}"
        );
        sqlx::query_as::<_, LendingRequest>(&sql)
            .bind(id)
            .bind(response_message)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::StaleState)
    }

    async fn return_lending_request(&self, id: Uuid) -> StoreResult<LendingRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE lending_requests SET status = 'returned' \
             WHERE id = $1 AND status = 'active' RETURNING {LENDING_COLUMNS}"
        );
        let request = sqlx::query_as::<_, LendingRequest>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::StaleState)?;

        sqlx::query(
            "UPDATE lending_history SET returned_at = now() \
             WHERE lending_request_id = $1 AND returned_at IS NULL",
        )
        .bind(request.id)
        .execute(&mut *tx)
        .await?;

        // availability is whatever the ledger says once this loan is closed
        sqlx::query(
            "UPDATE tools SET updated_at = now(), is_available = NOT EXISTS ( \
                 SELECT 1 FROM lending_history WHERE tool_id = $1 AND returned_at IS NULL) \
             WHERE id = $1",
        )
        .bind(request.tool_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn list_lending_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        status: Option<LendingStatus>,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingRequestView>, i64)> {
        let party = match direction {
            RequestDirection::Incoming => "owner_id",
            RequestDirection::Outgoing => "requester_id",
        };

        let sql = format!(
            "SELECT lr.id, lr.status, lr.message, lr.response_message, \
                    lr.requested_at, lr.responded_at, \
                    t.id AS tool_id, t.name AS tool_name, t.description AS tool_description, \
                    r.id AS requester_id, r.username AS requester_username, \
                    r.display_name AS requester_display_name, \
                    r.avatar_url AS requester_avatar_url, \
                    o.id AS owner_id, o.username AS owner_username, \
                    o.display_name AS owner_display_name, o.avatar_url AS owner_avatar_url \
             FROM lending_requests lr \
             JOIN tools t ON t.id = lr.tool_id \
             JOIN users r ON r.id = lr.requester_id \
             JOIN users o ON o.id = lr.owner_id \
             WHERE lr.{party} = $1 AND ($2::lending_status IS NULL OR lr.status = $2) \
             ORDER BY lr.requested_at DESC \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, LendingRequestRow>(&sql)
            .bind(user_id)
            .bind(status)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM lending_requests \
             WHERE {party} = $1 AND ($2::lending_status IS NULL OR status = $2)"
        );
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(user_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total))
    }

    async fn list_lending_history(
        &self,
        user_id: Uuid,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingHistoryView>, i64)> {
        let rows = sqlx::query_as::<_, LendingHistoryView>(
            "SELECT lh.id, lh.tool_id, lh.tool_name, lh.lending_request_id, \
                    lh.borrower_id, b.username AS borrower_username, \
                    lh.owner_id, o.username AS owner_username, \
                    lh.borrowed_at, lh.returned_at \
             FROM lending_history lh \
             JOIN users b ON b.id = lh.borrower_id \
             JOIN users o ON o.id = lh.owner_id \
             WHERE lh.borrower_id = $1 OR lh.owner_id = $1 \
             ORDER BY lh.borrowed_at DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM lending_history WHERE borrower_id = $1 OR owner_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }
}
