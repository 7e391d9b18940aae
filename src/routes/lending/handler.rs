use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    domain::{
        LendingService,
        models::{LendingRequestView, RequestDirection},
    },
    error::{AppError, AppResult},
    identity::CurrentUser,
    utils::{Paginated, Pagination, PaginationQuery, parse_id},
};

use super::model::{
    CreateLendingRequest, CreateLendingResponse, LendingListQuery, MessageResponse, RespondRequest,
};

/// An empty body is the same as `{}`.
fn optional_body(body: &Bytes) -> AppResult<CreateLendingRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateLendingRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(e.to_string()))
}

#[axum::debug_handler]
pub async fn create_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let body = optional_body(&body)?;

    let request = LendingService::new(state.store.as_ref())
        .create_request(user.id, tool_id, body.message)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLendingResponse {
            id: request.id,
            status: request.status,
            message: "Lending request created",
        }),
    ))
}

async fn list(
    state: &AppState,
    user: CurrentUser,
    direction: RequestDirection,
    query: &LendingListQuery,
) -> AppResult<Json<Paginated<LendingRequestView>>> {
    let page = Pagination::from_query(&query.page);
    let requests = LendingService::new(state.store.as_ref())
        .list_requests(user.id, direction, query.status(), page)
        .await?;
    Ok(Json(requests))
}

#[axum::debug_handler]
pub async fn incoming(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<LendingListQuery>,
) -> Result<impl IntoResponse, AppError> {
    list(&state, user, RequestDirection::Incoming, &query).await
}

#[axum::debug_handler]
pub async fn outgoing(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<LendingListQuery>,
) -> Result<impl IntoResponse, AppError> {
    list(&state, user, RequestDirection::Outgoing, &query).await
}

#[axum::debug_handler]
pub async fn respond(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<RespondRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = parse_id(&id, "request")?;
    let approve = req
        .approve
        .ok_or_else(|| AppError::bad_request("Must specify approve: true or false"))?;

    LendingService::new(state.store.as_ref())
        .respond(user.id, request_id, approve, req.message)
        .await?;

    Ok(Json(MessageResponse {
        message: if approve {
            "Request approved"
        } else {
            "Request denied"
        },
    }))
}

#[axum::debug_handler]
pub async fn mark_returned(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = parse_id(&id, "request")?;
    LendingService::new(state.store.as_ref())
        .mark_returned(user.id, request_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Tool returned",
    }))
}

#[axum::debug_handler]
pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query);
    let history = LendingService::new(state.store.as_ref())
        .history(user.id, page)
        .await?;
    Ok(Json(history))
}
