//! Borrow request lifecycle.
//!
//! ```text
//! pending --approve--> active --return--> returned
//!    \--deny--> denied
//! ```
//!
//! Guards run in a fixed order before any write. The store performs each
//! transition as one conditional, atomic unit, so a caller that loses a race
//! sees a conflict rather than overwriting the winner.

use uuid::Uuid;

use super::access;
use super::models::{
    LendingHistoryView, LendingRequest, LendingRequestView, LendingStatus, NewLendingRequest,
    RequestDirection,
};
use super::ports::{AccessStore, LendingStore, StoreError};
use crate::error::{AppError, AppResult};
use crate::utils::{Paginated, Pagination};

const ALREADY_REQUESTED: &str = "You already have a pending or active request for this tool";
const ALREADY_RESPONDED: &str = "Request has already been responded to";
const NOT_LENT_OUT: &str = "Tool is not currently lent out";

pub struct LendingService<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> LendingService<'a, S>
where
    S: LendingStore + AccessStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn create_request(
        &self,
        borrower: Uuid,
        tool_id: Uuid,
        message: Option<String>,
    ) -> AppResult<LendingRequest> {
        let tool = self
            .store
            .find_tool(tool_id)
            .await?
            .ok_or_else(|| AppError::not_found("Tool not found"))?;
        let toolbox = self
            .store
            .find_toolbox(tool.toolbox_id)
            .await?
            .ok_or_else(|| AppError::not_found("Toolbox not found"))?;

        if toolbox.owner_id == borrower {
            return Err(AppError::conflict("Cannot request to borrow your own tool"));
        }
        if !tool.is_available {
            return Err(AppError::conflict("Tool is currently not available"));
        }
        if !access::can_borrow(self.store, Some(borrower), &toolbox).await? {
            return Err(AppError::forbidden("You do not have access to this tool"));
        }
        if self.store.has_open_request(tool.id, borrower).await? {
            return Err(AppError::conflict(ALREADY_REQUESTED));
        }

        let message = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        let request = self
            .store
            .insert_lending_request(NewLendingRequest {
                tool_id: tool.id,
                requester_id: borrower,
                owner_id: toolbox.owner_id,
                message,
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => AppError::conflict(ALREADY_REQUESTED),
                other => other.into(),
            })?;

        tracing::info!(
            request_id = %request.id,
            tool_id = %tool.id,
            borrower = %borrower,
            "lending request created"
        );
        Ok(request)
    }

    /// Owner approves or denies a pending request.
    pub async fn respond(
        &self,
        actor: Uuid,
        request_id: Uuid,
        approve: bool,
        message: Option<String>,
    ) -> AppResult<LendingRequest> {
        let request = self.load(request_id).await?;
        if request.owner_id != actor {
            return Err(AppError::forbidden("You are not the owner of this tool"));
        }
        if request.status != LendingStatus::Pending {
            return Err(AppError::conflict(ALREADY_RESPONDED));
        }

        let result = if approve {
            self.store.approve_lending_request(request_id, message).await
        } else {
            self.store.deny_lending_request(request_id, message).await
        };
        let updated = result.map_err(|e| match e {
            StoreError::StaleState => AppError::conflict(ALREADY_RESPONDED),
            other => other.into(),
        })?;

        tracing::info!(
            request_id = %updated.id,
            status = ?updated.status,
            "lending request answered"
        );
        Ok(updated)
    }

    /// Either party closes an active loan.
    pub async fn mark_returned(&self, actor: Uuid, request_id: Uuid) -> AppResult<LendingRequest> {
        let request = self.load(request_id).await?;
        if actor != request.owner_id && actor != request.requester_id {
            return Err(AppError::forbidden("You are not involved in this lending"));
        }
        if request.status != LendingStatus::Active {
            return Err(AppError::conflict(NOT_LENT_OUT));
        }

        let updated = self
            .store
            .return_lending_request(request_id)
            .await
            .map_err(|e| match e {
                StoreError::StaleState => AppError::conflict(NOT_LENT_OUT),
                other => other.into(),
            })?;

        tracing::info!(request_id = %updated.id, actor = %actor, "tool returned");
        Ok(updated)
    }

    pub async fn list_requests(
        &self,
        user: Uuid,
        direction: RequestDirection,
        status: Option<LendingStatus>,
        page: Pagination,
    ) -> AppResult<Paginated<LendingRequestView>> {
        let (rows, total) = self
            .store
            .list_lending_requests(user, direction, status, page)
            .await?;
        Ok(Paginated::new(rows, total, page))
    }

    pub async fn history(
        &self,
        user: Uuid,
        page: Pagination,
    ) -> AppResult<Paginated<LendingHistoryView>> {
        let (rows, total) = self.store.list_lending_history(user, page).await?;
        Ok(Paginated::new(rows, total, page))
    }

    async fn load(&self, request_id: Uuid) -> AppResult<LendingRequest> {
        self.store
            .find_lending_request(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("Lending request not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::domain::models::{PermissionLevel, Visibility};
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    struct Shop {
        store: MemoryStore,
        owner: Uuid,
        borrower: Uuid,
        tool: Uuid,
    }

    #[fixture]
    fn shop() -> Shop {
        let store = MemoryStore::default();
        let owner = store.add_user("owner");
        let borrower = store.add_user("borrower");
        let toolbox = store.add_toolbox(owner, Visibility::Public);
        let tool = store.add_tool(toolbox, "Drill");
        Shop {
            store,
            owner,
            borrower,
            tool,
        }
    }

    fn assert_ledger_consistent(store: &MemoryStore, tool: Uuid) {
        assert_eq!(
            store.tool_available(tool),
            store.open_history_rows(tool) == 0,
            "availability must mirror open history rows"
        );
        assert!(store.open_history_rows(tool) <= 1);
    }

    #[rstest]
    #[tokio::test]
    async fn approve_then_second_request_conflicts(shop: Shop) {
        let svc = LendingService::new(&shop.store);
        let req = svc.create_request(shop.borrower, shop.tool, None).await.unwrap();
        assert_eq!(req.status, LendingStatus::Pending);
        assert_eq!(req.owner_id, shop.owner);

        let approved = svc
            .respond(shop.owner, req.id, true, Some("sure".into()))
            .await
            .unwrap();
        assert_eq!(approved.status, LendingStatus::Active);
        assert_eq!(approved.response_message.as_deref(), Some("sure"));
        assert!(approved.responded_at.is_some());
        assert!(!shop.store.tool_available(shop.tool));
        assert_eq!(shop.store.open_history_rows(shop.tool), 1);
        assert_ledger_consistent(&shop.store, shop.tool);

        let err = svc.create_request(shop.borrower, shop.tool, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn deny_leaves_tool_untouched(shop: Shop) {
        let svc = LendingService::new(&shop.store);
        let req = svc.create_request(shop.borrower, shop.tool, None).await.unwrap();
        let denied = svc.respond(shop.owner, req.id, false, None).await.unwrap();

        assert_eq!(denied.status, LendingStatus::Denied);
        assert!(shop.store.tool_available(shop.tool));
        assert_eq!(shop.store.history_rows(shop.tool), 0);

        // a denied request no longer blocks a fresh one
        assert!(svc.create_request(shop.borrower, shop.tool, None).await.is_ok());
    }

    #[rstest]
    #[case::by_owner(true)]
    #[case::by_borrower(false)]
    #[tokio::test]
    async fn either_party_can_return_once(shop: Shop, #[case] owner_returns: bool) {
        let svc = LendingService::new(&shop.store);
        let req = svc.create_request(shop.borrower, shop.tool, None).await.unwrap();
        svc.respond(shop.owner, req.id, true, None).await.unwrap();

        let actor = if owner_returns { shop.owner } else { shop.borrower };
        let returned = svc.mark_returned(actor, req.id).await.unwrap();
        assert_eq!(returned.status, LendingStatus::Returned);
        assert!(shop.store.tool_available(shop.tool));
        assert_eq!(shop.store.open_history_rows(shop.tool), 0);
        assert_eq!(shop.store.history_rows(shop.tool), 1);
        assert_ledger_consistent(&shop.store, shop.tool);

        let err = svc.mark_returned(actor, req.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == NOT_LENT_OUT));
    }

    #[rstest]
    #[tokio::test]
    async fn create_guards_fire_in_order(shop: Shop) {
        let svc = LendingService::new(&shop.store);

        let err = svc.create_request(shop.borrower, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = svc.create_request(shop.owner, shop.tool, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let private = shop.store.add_toolbox(shop.owner, Visibility::Private);
        let hidden = shop.store.add_tool(private, "Saw");
        let err = svc.create_request(shop.borrower, hidden, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        shop.store.add_grant(private, shop.borrower, PermissionLevel::View);
        let err = svc.create_request(shop.borrower, hidden, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        shop.store.add_grant(private, shop.borrower, PermissionLevel::Borrow);
        assert!(svc.create_request(shop.borrower, hidden, None).await.is_ok());
        let err = svc.create_request(shop.borrower, hidden, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == ALREADY_REQUESTED));
    }

    #[rstest]
    #[tokio::test]
    async fn respond_guards(shop: Shop) {
        let svc = LendingService::new(&shop.store);
        let req = svc.create_request(shop.borrower, shop.tool, None).await.unwrap();

        let err = svc.respond(shop.borrower, req.id, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = svc.respond(shop.owner, Uuid::new_v4(), true, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = svc.mark_returned(shop.borrower, req.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        svc.respond(shop.owner, req.id, false, None).await.unwrap();
        let err = svc.respond(shop.owner, req.id, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == ALREADY_RESPONDED));

        let stranger = shop.store.add_user("stranger");
        let err = svc.mark_returned(stranger, req.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn approving_second_borrower_while_lent_out_conflicts(shop: Shop) {
        let svc = LendingService::new(&shop.store);
        let other = shop.store.add_user("other");
        let first = svc.create_request(shop.borrower, shop.tool, None).await.unwrap();
        let second = svc.create_request(other, shop.tool, None).await.unwrap();

        svc.respond(shop.owner, first.id, true, None).await.unwrap();
        let err = svc.respond(shop.owner, second.id, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            shop.store.request_status(second.id),
            Some(LendingStatus::Pending)
        );
        assert_ledger_consistent(&shop.store, shop.tool);
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_approvals_have_one_winner(shop: Shop) {
        let store = Arc::new(shop.store);
        let req = LendingService::new(store.as_ref())
            .create_request(shop.borrower, shop.tool, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let owner = shop.owner;
            handles.push(tokio::spawn(async move {
                LendingService::new(store.as_ref())
                    .respond(owner, req.id, true, None)
                    .await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(err) => assert!(matches!(err, AppError::Conflict(_))),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.open_history_rows(shop.tool), 1);
        assert_ledger_consistent(&store, shop.tool);
    }

    #[rstest]
    #[tokio::test]
    async fn lists_split_by_direction_and_status(shop: Shop) {
        let svc = LendingService::new(&shop.store);
        let req = svc
            .create_request(shop.borrower, shop.tool, Some("  for the deck  ".into()))
            .await
            .unwrap();
        assert_eq!(req.message.as_deref(), Some("for the deck"));
        let page = Pagination { page: 1, page_size: 20 };

        let incoming = svc
            .list_requests(shop.owner, RequestDirection::Incoming, None, page)
            .await
            .unwrap();
        assert_eq!(incoming.pagination.total, 1);
        assert_eq!(incoming.data[0].tool.name, "Drill");
        assert_eq!(incoming.data[0].requester.username, "borrower");

        let outgoing = svc
            .list_requests(shop.owner, RequestDirection::Outgoing, None, page)
            .await
            .unwrap();
        assert_eq!(outgoing.pagination.total, 0);

        let active = svc
            .list_requests(
                shop.borrower,
                RequestDirection::Outgoing,
                Some(LendingStatus::Active),
                page,
            )
            .await
            .unwrap();
        assert!(active.data.is_empty());

        svc.respond(shop.owner, req.id, true, None).await.unwrap();
        let history = svc.history(shop.borrower, page).await.unwrap();
        assert_eq!(history.pagination.total, 1);
        assert_eq!(history.data[0].owner_username, "owner");
        assert!(history.data[0].returned_at.is_none());
    }
}
