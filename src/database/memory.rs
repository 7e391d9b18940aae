//! In-process store used by unit and router tests.
//!
//! Mirrors the constraints of the Postgres schema: the partial unique
//! indexes and the conditional updates behind every guarded transition.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::models::{
    BuddyRequest, BuddyRequestStatus, BuddyRequestView, LendingHistory, LendingHistoryView,
    LendingRequest, LendingRequestView, LendingStatus, NewLendingRequest, PermissionLevel,
    RequestDirection, ToolRef, ToolSummary, ToolboxAccess, UserSummary, Visibility,
};
use crate::domain::ports::{
    AccessStore, BuddyStore, LendingStore, StoreError, StoreResult, UserDirectory,
};
use crate::utils::Pagination;

struct UserRec {
    external_id: String,
    username: String,
}

struct ToolRec {
    toolbox_id: Uuid,
    name: String,
    is_available: bool,
}

#[derive(Default)]
struct Inner {
    seq: i64,
    users: HashMap<Uuid, UserRec>,
    toolboxes: HashMap<Uuid, ToolboxAccess>,
    grants: HashMap<(Uuid, Uuid), PermissionLevel>,
    buddies: HashSet<(Uuid, Uuid)>,
    tools: HashMap<Uuid, ToolRec>,
    lending: Vec<LendingRequest>,
    history: Vec<LendingHistory>,
    buddy_requests: Vec<BuddyRequest>,
}

impl Inner {
    /// Strictly increasing timestamps keep "newest first" orderings stable.
    fn now(&mut self) -> DateTime<Utc> {
        self.seq += 1;
        Utc::now() + Duration::milliseconds(self.seq)
    }

    fn summary(&self, id: Uuid) -> UserSummary {
        UserSummary {
            id,
            username: self
                .users
                .get(&id)
                .map(|u| u.username.clone())
                .unwrap_or_default(),
            display_name: None,
            avatar_url: None,
        }
    }

    fn lending_view(&self, r: &LendingRequest) -> LendingRequestView {
        let name = self
            .tools
            .get(&r.tool_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        LendingRequestView {
            id: r.id,
            status: r.status,
            message: r.message.clone(),
            response_message: r.response_message.clone(),
            requested_at: r.requested_at,
            responded_at: r.responded_at,
            tool: ToolSummary {
                id: r.tool_id,
                name,
                description: None,
            },
            requester: self.summary(r.requester_id),
            owner: self.summary(r.owner_id),
        }
    }
}

fn paginate<T>(rows: Vec<T>, page: Pagination) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let rows = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    (rows, total)
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }

    pub fn add_user(&self, username: &str) -> Uuid {
        self.add_user_with_external_id(username, &format!("ext_{username}"))
    }

    pub fn add_user_with_external_id(&self, username: &str, external_id: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().users.insert(
            id,
            UserRec {
                external_id: external_id.to_string(),
                username: username.to_string(),
            },
        );
        id
    }

    pub fn add_toolbox(&self, owner: Uuid, visibility: Visibility) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().toolboxes.insert(
            id,
            ToolboxAccess {
                id,
                owner_id: owner,
                visibility,
            },
        );
        id
    }

    pub fn add_tool(&self, toolbox_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().tools.insert(
            id,
            ToolRec {
                toolbox_id,
                name: name.to_string(),
                is_available: true,
            },
        );
        id
    }

    pub fn add_grant(&self, toolbox_id: Uuid, user_id: Uuid, level: PermissionLevel) {
        self.lock().grants.insert((toolbox_id, user_id), level);
    }

    pub fn add_buddies(&self, a: Uuid, b: Uuid) {
        let mut inner = self.lock();
        inner.buddies.insert((a, b));
        inner.buddies.insert((b, a));
    }

    pub fn tool_available(&self, tool_id: Uuid) -> bool {
        self.lock()
            .tools
            .get(&tool_id)
            .map(|t| t.is_available)
            .unwrap_or(false)
    }

    pub fn history_rows(&self, tool_id: Uuid) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|h| h.tool_id == Some(tool_id))
            .count()
    }

    pub fn open_history_rows(&self, tool_id: Uuid) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|h| h.tool_id == Some(tool_id) && h.returned_at.is_none())
            .count()
    }

    pub fn request_status(&self, request_id: Uuid) -> Option<LendingStatus> {
        self.lock()
            .lending
            .iter()
            .find(|r| r.id == request_id)
            .map(|r| r.status)
    }

    pub fn buddy_request_count(&self) -> usize {
        self.lock().buddy_requests.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user_id_by_external_id(&self, external_id: &str) -> StoreResult<Option<Uuid>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(_, u)| u.external_id == external_id)
            .map(|(id, _)| *id))
    }

    async fn user_exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock().users.contains_key(&id))
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn find_toolbox(&self, id: Uuid) -> StoreResult<Option<ToolboxAccess>> {
        Ok(self.lock().toolboxes.get(&id).cloned())
    }

    async fn is_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        Ok(self.lock().buddies.contains(&(a, b)))
    }

    async fn find_grant(
        &self,
        toolbox_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<PermissionLevel>> {
        Ok(self.lock().grants.get(&(toolbox_id, user_id)).copied())
    }
}

#[async_trait]
impl BuddyStore for MemoryStore {
    async fn find_pending_between(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> StoreResult<Option<BuddyRequest>> {
        Ok(self
            .lock()
            .buddy_requests
            .iter()
            .find(|r| {
                r.requester_id == requester
                    && r.target_id == target
                    && r.status == BuddyRequestStatus::Pending
            })
            .cloned())
    }

    async fn insert_buddy_request(
        &self,
        requester: Uuid,
        target: Uuid,
    ) -> StoreResult<BuddyRequest> {
        let mut inner = self.lock();
        let clash = inner.buddy_requests.iter().any(|r| {
            r.status == BuddyRequestStatus::Pending
                && ((r.requester_id == requester && r.target_id == target)
                    || (r.requester_id == target && r.target_id == requester))
        });
        if clash {
            return Err(StoreError::UniqueViolation(
                "idx_buddy_requests_pending_pair".into(),
            ));
        }
        let created_at = inner.now();
        let request = BuddyRequest {
            id: Uuid::new_v4(),
            requester_id: requester,
            target_id: target,
            status: BuddyRequestStatus::Pending,
            created_at,
            responded_at: None,
        };
        inner.buddy_requests.push(request.clone());
        Ok(request)
    }

    async fn find_buddy_request(&self, id: Uuid) -> StoreResult<Option<BuddyRequest>> {
        Ok(self
            .lock()
            .buddy_requests
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn accept_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest> {
        let mut inner = self.lock();
        let now = inner.now();
        let request = inner
            .buddy_requests
            .iter_mut()
            .find(|r| r.id == id && r.status == BuddyRequestStatus::Pending)
            .ok_or(StoreError::StaleState)?;
        request.status = BuddyRequestStatus::Accepted;
        request.responded_at = Some(now);
        let request = request.clone();
        inner.buddies.insert((request.requester_id, request.target_id));
        inner.buddies.insert((request.target_id, request.requester_id));
        Ok(request)
    }

    async fn reject_buddy_request(&self, id: Uuid) -> StoreResult<BuddyRequest> {
        let mut inner = self.lock();
        let now = inner.now();
        let request = inner
            .buddy_requests
            .iter_mut()
            .find(|r| r.id == id && r.status == BuddyRequestStatus::Pending)
            .ok_or(StoreError::StaleState)?;
        request.status = BuddyRequestStatus::Rejected;
        request.responded_at = Some(now);
        Ok(request.clone())
    }

    async fn list_buddy_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        page: Pagination,
    ) -> StoreResult<(Vec<BuddyRequestView>, i64)> {
        let inner = self.lock();
        let mut rows: Vec<BuddyRequestView> = inner
            .buddy_requests
            .iter()
            .filter(|r| r.status == BuddyRequestStatus::Pending)
            .filter_map(|r| {
                let other = match direction {
                    RequestDirection::Incoming if r.target_id == user_id => r.requester_id,
                    RequestDirection::Outgoing if r.requester_id == user_id => r.target_id,
                    _ => return None,
                };
                Some(BuddyRequestView {
                    id: r.id,
                    status: r.status,
                    created_at: r.created_at,
                    user: inner.summary(other),
                })
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(rows, page))
    }

    async fn remove_buddy(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        let ab = inner.buddies.remove(&(a, b));
        let ba = inner.buddies.remove(&(b, a));
        Ok(ab || ba)
    }
}

#[async_trait]
impl LendingStore for MemoryStore {
    async fn find_tool(&self, id: Uuid) -> StoreResult<Option<ToolRef>> {
        Ok(self.lock().tools.get(&id).map(|t| ToolRef {
            id,
            toolbox_id: t.toolbox_id,
            is_available: t.is_available,
        }))
    }

    async fn has_open_request(&self, tool_id: Uuid, requester_id: Uuid) -> StoreResult<bool> {
        Ok(self.lock().lending.iter().any(|r| {
            r.tool_id == tool_id && r.requester_id == requester_id && r.status.is_open()
        }))
    }

    async fn insert_lending_request(&self, new: NewLendingRequest) -> StoreResult<LendingRequest> {
        let mut inner = self.lock();
        let clash = inner.lending.iter().any(|r| {
            r.tool_id == new.tool_id && r.requester_id == new.requester_id && r.status.is_open()
        });
        if clash {
            return Err(StoreError::UniqueViolation("idx_lending_requests_open".into()));
        }
        let requested_at = inner.now();
        let request = LendingRequest {
            id: Uuid::new_v4(),
            tool_id: new.tool_id,
            requester_id: new.requester_id,
            owner_id: new.owner_id,
            status: LendingStatus::Pending,
            message: new.message,
            response_message: None,
            requested_at,
            responded_at: None,
        };
        inner.lending.push(request.clone());
        Ok(request)
    }

    async fn find_lending_request(&self, id: Uuid) -> StoreResult<Option<LendingRequest>> {
        Ok(self.lock().lending.iter().find(|r| r.id == id).cloned())
    }

    async fn approve_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest> {
        let mut inner = self.lock();
        let now = inner.now();
        let idx = inner
            .lending
            .iter()
            .position(|r| r.id == id && r.status == LendingStatus::Pending)
            .ok_or(StoreError::StaleState)?;
        let tool_id = inner.lending[idx].tool_id;
        let tool = inner
            .tools
            .get_mut(&tool_id)
            .ok_or_else(|| StoreError::Backend("tool vanished".into()))?;
        if !tool.is_available {
            return Err(StoreError::ToolUnavailable);
        }
        tool.is_available = false;
        let tool_name = tool.name.clone();

        let request = &mut inner.lending[idx];
        request.status = LendingStatus::Active;
        request.responded_at = Some(now);
        request.response_message = response_message;
        let request = request.clone();

        inner.history.push(LendingHistory {
            id: Uuid::new_v4(),
            tool_id: Some(tool_id),
            tool_name,
            borrower_id: request.requester_id,
            owner_id: request.owner_id,
            lending_request_id: Some(request.id),
            borrowed_at: now,
            returned_at: None,
        });
        Ok(request)
    }

    async fn deny_lending_request(
        &self,
        id: Uuid,
        response_message: Option<String>,
    ) -> StoreResult<LendingRequest> {
        let mut inner = self.lock();
        let now = inner.now();
        let request = inner
            .lending
            .iter_mut()
            .find(|r| r.id == id && r.status == LendingStatus::Pending)
            .ok_or(StoreError::StaleState)?;
        request.status = LendingStatus::Denied;
        request.responded_at = Some(now);
        request.response_message = response_message;
        Ok(request.clone())
    }

    async fn return_lending_request(&self, id: Uuid) -> StoreResult<LendingRequest> {
        let mut inner = self.lock();
        let now = inner.now();
        let request = inner
            .lending
            .iter_mut()
            .find(|r| r.id == id && r.status == LendingStatus::Active)
            .ok_or(StoreError::StaleState)?;
        request.status = LendingStatus::Returned;
        let request = request.clone();

        for row in inner.history.iter_mut() {
            if row.lending_request_id == Some(id) && row.returned_at.is_none() {
                row.returned_at = Some(now);
            }
        }
        let still_out = inner
            .history
            .iter()
            .any(|h| h.tool_id == Some(request.tool_id) && h.returned_at.is_none());
        if let Some(tool) = inner.tools.get_mut(&request.tool_id) {
            tool.is_available = !still_out;
        }
        Ok(request)
    }

    async fn list_lending_requests(
        &self,
        user_id: Uuid,
        direction: RequestDirection,
        status: Option<LendingStatus>,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingRequestView>, i64)> {
        let inner = self.lock();
        let mut rows: Vec<LendingRequestView> = inner
            .lending
            .iter()
            .filter(|r| match direction {
                RequestDirection::Incoming => r.owner_id == user_id,
                RequestDirection::Outgoing => r.requester_id == user_id,
            })
            .filter(|r| status.is_none_or(|s| r.status == s))
            .map(|r| inner.lending_view(r))
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(paginate(rows, page))
    }

    async fn list_lending_history(
        &self,
        user_id: Uuid,
        page: Pagination,
    ) -> StoreResult<(Vec<LendingHistoryView>, i64)> {
        let inner = self.lock();
        let mut rows: Vec<LendingHistoryView> = inner
            .history
            .iter()
            .filter(|h| h.borrower_id == user_id || h.owner_id == user_id)
            .map(|h| LendingHistoryView {
                id: h.id,
                tool_id: h.tool_id,
                tool_name: h.tool_name.clone(),
                lending_request_id: h.lending_request_id,
                borrower_id: h.borrower_id,
                borrower_username: inner.summary(h.borrower_id).username,
                owner_id: h.owner_id,
                owner_username: inner.summary(h.owner_id).username,
                borrowed_at: h.borrowed_at,
                returned_at: h.returned_at,
            })
            .collect();
        rows.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at));
        Ok(paginate(rows, page))
    }
}
