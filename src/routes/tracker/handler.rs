use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    domain::{StoreError, models::TrackerType},
    error::AppError,
    identity::CurrentUser,
    routes::tool::owned_tool,
    utils::{
        Paginated, Pagination, PaginationQuery, parse_id,
        validation::{require_text, validate_coordinates},
    },
};

use super::model::{
    AttachTrackerRequest, LOCATION_HISTORY_PAGE_SIZE, Location, LocationReport, LocationUpdated,
    Tracker, TrackerResponse,
};

const ALREADY_TRACKED: &str = "Tool already has a tracker. Remove it first.";
const NO_ACTIVE_TRACKER: &str = "No active tracker on this tool";

#[axum::debug_handler]
pub async fn list_mine(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let trackers = Tracker::list_for_owner(&state.pool, user.id).await?;
    Ok(Json(
        trackers
            .into_iter()
            .map(TrackerResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[axum::debug_handler]
pub async fn attach(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<AttachTrackerRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let (Some(raw_type), Some(identifier)) = (req.tracker_type.as_deref(), req.tracker_identifier.as_deref()) else {
        return Err(AppError::bad_request(
            "trackerType and trackerIdentifier are required",
        ));
    };
    let identifier = require_text(Some(identifier), "trackerIdentifier")?;
    let tracker_type = TrackerType::parse(raw_type).ok_or_else(|| {
        AppError::bad_request(
            "Invalid tracker type. Valid types: airtag, tile, gps_cellular, gps_satellite, other",
        )
    })?;

    let tool = owned_tool(&state, user.id, tool_id).await?;
    if Tracker::for_tool(&state.pool, tool.id, false).await?.is_some() {
        return Err(AppError::conflict(ALREADY_TRACKED));
    }

    Tracker::attach(&state.pool, tool.id, tracker_type, &identifier, req.tracker_name)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::UniqueViolation(_) => AppError::conflict(ALREADY_TRACKED),
            other => other.into(),
        })?;
    tracing::info!(tool_id = %tool.id, tracker_type = ?tracker_type, "tracker attached");

    let tracker = Tracker::for_tool(&state.pool, tool.id, false)
        .await?
        .ok_or_else(|| AppError::not_found("No tracker on this tool"))?;
    Ok((StatusCode::CREATED, Json(TrackerResponse::from(tracker))))
}

#[axum::debug_handler]
pub async fn report_location(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<LocationReport>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let (Some(latitude), Some(longitude)) = (req.latitude, req.longitude) else {
        return Err(AppError::bad_request("latitude and longitude are required"));
    };
    validate_coordinates(latitude, longitude)?;

    let tool = owned_tool(&state, user.id, tool_id).await?;
    let tracker = Tracker::for_tool(&state.pool, tool.id, true)
        .await?
        .ok_or_else(|| AppError::not_found(NO_ACTIVE_TRACKER))?;

    let location = Location {
        latitude,
        longitude,
        accuracy: req.accuracy,
    };
    tracker.record(&state.pool, location).await?;

    Ok(Json(LocationUpdated {
        message: "Location updated",
        location,
    }))
}

#[axum::debug_handler]
pub async fn detach(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    if !Tracker::detach(&state.pool, tool.id).await? {
        return Err(AppError::not_found("No tracker found on this tool"));
    }
    tracing::info!(tool_id = %tool.id, "tracker removed");
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn location(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    let tracker = Tracker::for_tool(&state.pool, tool.id, true)
        .await?
        .ok_or_else(|| AppError::not_found(NO_ACTIVE_TRACKER))?;
    Ok(Json(TrackerResponse::from(tracker)))
}

#[axum::debug_handler]
pub async fn location_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let page = Pagination::with_default_size(&query, LOCATION_HISTORY_PAGE_SIZE);
    let tool = owned_tool(&state, user.id, tool_id).await?;

    let tracker = Tracker::for_tool(&state.pool, tool.id, false)
        .await?
        .ok_or_else(|| AppError::not_found("No tracker on this tool"))?;
    let (pings, total) = tracker.history(&state.pool, page).await?;
    Ok(Json(Paginated::new(pings, total, page)))
}
