//! Buddy handshake: pending -> accepted | rejected, with crossed requests
//! collapsing into an immediate accept.

use uuid::Uuid;

use super::models::{BuddyRequest, BuddyRequestStatus, BuddyRequestView, RequestDirection};
use super::ports::{AccessStore, BuddyStore, StoreError, UserDirectory};
use crate::error::{AppError, AppResult};
use crate::utils::{Paginated, Pagination};

const ALREADY_PENDING: &str = "Buddy request already pending";

#[derive(Debug)]
pub enum SendOutcome {
    Created(BuddyRequest),
    /// The target had already asked us; their request was accepted instead.
    AutoAccepted(BuddyRequest),
}

pub struct BuddyService<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> BuddyService<'a, S>
where
    S: BuddyStore + AccessStore + UserDirectory + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn send_request(&self, from: Uuid, to: Uuid) -> AppResult<SendOutcome> {
        if from == to {
            return Err(AppError::bad_request("Cannot send buddy request to yourself"));
        }
        if !self.store.user_exists(to).await? {
            return Err(AppError::not_found("User not found"));
        }
        if self.store.is_buddy(from, to).await? {
            return Err(AppError::conflict("Already buddies"));
        }

        if let Some(crossed) = self.store.find_pending_between(to, from).await? {
            let accepted = self
                .store
                .accept_buddy_request(crossed.id)
                .await
                .map_err(|e| match e {
                    StoreError::StaleState => AppError::conflict(ALREADY_PENDING),
                    other => other.into(),
                })?;
            tracing::info!(request_id = %accepted.id, a = %from, b = %to, "buddy request auto-accepted");
            return Ok(SendOutcome::AutoAccepted(accepted));
        }
        if self.store.find_pending_between(from, to).await?.is_some() {
            return Err(AppError::conflict(ALREADY_PENDING));
        }

        let created = self
            .store
            .insert_buddy_request(from, to)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => AppError::conflict(ALREADY_PENDING),
                other => other.into(),
            })?;
        tracing::info!(request_id = %created.id, from = %from, to = %to, "buddy request sent");
        Ok(SendOutcome::Created(created))
    }

    pub async fn respond(&self, actor: Uuid, request_id: Uuid, accept: bool) -> AppResult<BuddyRequest> {
        let request = self
            .store
            .find_buddy_request(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("Buddy request not found"))?;
        if request.target_id != actor {
            return Err(AppError::forbidden("Cannot respond to this buddy request"));
        }
        if request.status != BuddyRequestStatus::Pending {
            return Err(AppError::conflict("Request has already been responded to"));
        }

        let result = if accept {
            self.store.accept_buddy_request(request_id).await
        } else {
            self.store.reject_buddy_request(request_id).await
        };
        let updated = result.map_err(|e| match e {
            StoreError::StaleState => AppError::conflict("Request has already been responded to"),
            other => other.into(),
        })?;

        tracing::info!(request_id = %updated.id, status = ?updated.status, "buddy request answered");
        Ok(updated)
    }

    pub async fn remove(&self, user: Uuid, buddy: Uuid) -> AppResult<()> {
        if !self.store.remove_buddy(user, buddy).await? {
            return Err(AppError::not_found("Buddy relationship not found"));
        }
        tracing::info!(user = %user, buddy = %buddy, "buddy removed");
        Ok(())
    }

    pub async fn list(
        &self,
        user: Uuid,
        direction: RequestDirection,
        page: Pagination,
    ) -> AppResult<Paginated<BuddyRequestView>> {
        let (rows, total) = self.store.list_buddy_requests(user, direction, page).await?;
        Ok(Paginated::new(rows, total, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use rstest::{fixture, rstest};

    struct Pair {
        store: MemoryStore,
        a: Uuid,
        b: Uuid,
    }

    #[fixture]
    fn pair() -> Pair {
        let store = MemoryStore::default();
        let a = store.add_user("alice");
        let b = store.add_user("bob");
        Pair { store, a, b }
    }

    async fn symmetric(store: &MemoryStore, a: Uuid, b: Uuid) -> bool {
        let ab = store.is_buddy(a, b).await.unwrap();
        let ba = store.is_buddy(b, a).await.unwrap();
        assert_eq!(ab, ba, "buddy edges must be symmetric");
        ab
    }

    #[rstest]
    #[tokio::test]
    async fn crossed_requests_collapse_into_one_accept(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        let first = match svc.send_request(pair.b, pair.a).await.unwrap() {
            SendOutcome::Created(r) => r,
            other => panic!("expected a new request, got {other:?}"),
        };

        match svc.send_request(pair.a, pair.b).await.unwrap() {
            SendOutcome::AutoAccepted(r) => {
                assert_eq!(r.id, first.id);
                assert_eq!(r.status, BuddyRequestStatus::Accepted);
            }
            other => panic!("expected auto-accept, got {other:?}"),
        }
        assert!(symmetric(&pair.store, pair.a, pair.b).await);
        assert_eq!(pair.store.buddy_request_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn send_guards(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        assert!(matches!(
            svc.send_request(pair.a, pair.a).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            svc.send_request(pair.a, Uuid::new_v4()).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        svc.send_request(pair.a, pair.b).await.unwrap();
        assert!(matches!(
            svc.send_request(pair.a, pair.b).await.unwrap_err(),
            AppError::Conflict(_)
        ));

        pair.store.add_buddies(pair.a, pair.b);
        assert!(matches!(
            svc.send_request(pair.a, pair.b).await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn only_target_may_respond_once(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        let SendOutcome::Created(req) = svc.send_request(pair.a, pair.b).await.unwrap() else {
            panic!("expected a new request");
        };

        assert!(matches!(
            svc.respond(pair.a, req.id, true).await.unwrap_err(),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            svc.respond(pair.b, Uuid::new_v4(), true).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        let accepted = svc.respond(pair.b, req.id, true).await.unwrap();
        assert_eq!(accepted.status, BuddyRequestStatus::Accepted);
        assert!(accepted.responded_at.is_some());
        assert!(symmetric(&pair.store, pair.a, pair.b).await);

        assert!(matches!(
            svc.respond(pair.b, req.id, false).await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn rejection_allows_a_fresh_request(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        let SendOutcome::Created(req) = svc.send_request(pair.a, pair.b).await.unwrap() else {
            panic!("expected a new request");
        };
        let rejected = svc.respond(pair.b, req.id, false).await.unwrap();
        assert_eq!(rejected.status, BuddyRequestStatus::Rejected);
        assert!(!symmetric(&pair.store, pair.a, pair.b).await);

        assert!(matches!(
            svc.send_request(pair.a, pair.b).await.unwrap(),
            SendOutcome::Created(_)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn removal_drops_both_edges(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        pair.store.add_buddies(pair.a, pair.b);
        svc.remove(pair.b, pair.a).await.unwrap();
        assert!(!symmetric(&pair.store, pair.a, pair.b).await);
        assert!(matches!(
            svc.remove(pair.a, pair.b).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn listing_shows_the_other_party(pair: Pair) {
        let svc = BuddyService::new(&pair.store);
        svc.send_request(pair.a, pair.b).await.unwrap();
        let page = Pagination { page: 1, page_size: 20 };

        let incoming = svc.list(pair.b, RequestDirection::Incoming, page).await.unwrap();
        assert_eq!(incoming.data.len(), 1);
        assert_eq!(incoming.data[0].user.username, "alice");

        let outgoing = svc.list(pair.a, RequestDirection::Outgoing, page).await.unwrap();
        assert_eq!(outgoing.data[0].user.username, "bob");
        assert!(svc.list(pair.a, RequestDirection::Incoming, page).await.unwrap().data.is_empty());
    }
}
