use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    domain::{BuddyService, SendOutcome, models::BuddyRequestStatus},
    error::AppError,
    identity::CurrentUser,
    utils::{Pagination, parse_id},
};

use super::model::{BuddyListQuery, BuddyMessage, MutualAccept, RespondBuddyRequest};

#[axum::debug_handler]
pub async fn list_requests(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<BuddyListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query.page);
    let requests = BuddyService::new(state.store.as_ref())
        .list(user.id, query.direction(), page)
        .await?;
    Ok(Json(requests))
}

/// Mounted both as `/users/{id}/buddy-request` and `/buddy-requests/send/{id}`.
#[axum::debug_handler]
pub async fn send_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let target = parse_id(&id, "user")?;

    let outcome = BuddyService::new(state.store.as_ref())
        .send_request(user.id, target)
        .await?;

    Ok(match outcome {
        SendOutcome::Created(request) => (StatusCode::CREATED, Json(request)).into_response(),
        SendOutcome::AutoAccepted(request) => Json(MutualAccept {
            message: "Buddy request accepted (mutual request)",
            request,
        })
        .into_response(),
    })
}

#[axum::debug_handler]
pub async fn respond(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<RespondBuddyRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = parse_id(&id, "request")?;
    let accept = req
        .accept
        .ok_or_else(|| AppError::bad_request("Must specify accept: true or false"))?;

    let updated = BuddyService::new(state.store.as_ref())
        .respond(user.id, request_id, accept)
        .await?;

    Ok(Json(BuddyMessage {
        message: match updated.status {
            BuddyRequestStatus::Accepted => "Buddy request accepted",
            _ => "Buddy request rejected",
        },
    }))
}
