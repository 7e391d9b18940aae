use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    domain::{UserDirectory, access, models::PermissionLevel, models::Visibility},
    error::AppError,
    identity::CurrentUser,
    middleware::MaybeUser,
    routes::tool::model::{CreateToolRequest, Tool},
    utils::{Paginated, Pagination, PaginationQuery, PatchBuilder, parse_id, validation::require_text},
};

use super::model::{
    CreateToolboxRequest, Grant, GrantOutcome, GrantRequest, Toolbox, ToolboxPatch,
};

#[axum::debug_handler]
pub async fn list_mine(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query);
    let (rows, total) = Toolbox::list_for_owner(&state.pool, user.id, page).await?;
    Ok(Json(Paginated::new(rows, total, page)))
}

#[axum::debug_handler]
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    WithRejection(Json(req), _): WithRejection<Json<CreateToolboxRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let name = require_text(req.name.as_deref(), "Name")?;
    let visibility = req
        .visibility
        .as_deref()
        .and_then(Visibility::parse)
        .unwrap_or(Visibility::Private);

    let toolbox = Toolbox::create(&state.pool, user.id, name, visibility, req).await?;
    tracing::info!(toolbox_id = %toolbox.id, owner = %user.id, "toolbox created");
    Ok((StatusCode::CREATED, Json(toolbox)))
}

#[axum::debug_handler]
pub async fn get_one(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::viewable_toolbox(state.store.as_ref(), viewer.id(), toolbox_id).await?;

    let toolbox = Toolbox::find(&state.pool, toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    Ok(Json(toolbox))
}

#[axum::debug_handler]
pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(patch), _): WithRejection<Json<ToolboxPatch>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;
    if let Some(name) = patch.name.as_deref() {
        require_text(Some(name), "Name")?;
    }

    let mut builder = PatchBuilder::new("toolboxes");
    patch.apply(&mut builder);
    if builder.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }
    Toolbox::update(&state.pool, toolbox_id, builder).await?;

    let toolbox = Toolbox::find(&state.pool, toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    Ok(Json(toolbox))
}

#[axum::debug_handler]
pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;

    if !Toolbox::delete(&state.pool, toolbox_id).await? {
        return Err(AppError::conflict(
            "Cannot delete a toolbox while one of its tools is lent out",
        ));
    }
    tracing::info!(toolbox_id = %toolbox_id, "toolbox deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn list_permissions(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;
    Ok(Json(Grant::list(&state.pool, toolbox_id).await?))
}

/// New grant -> 201, level change -> 200, same level again -> 409.
#[axum::debug_handler]
pub async fn grant_permission(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<GrantRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    let grantee = parse_id(req.user_id.as_deref().unwrap_or_default(), "user")?;
    let level = match req.permission_level.as_deref() {
        None => PermissionLevel::View,
        Some(raw) => PermissionLevel::parse(raw)
            .ok_or_else(|| AppError::bad_request("Invalid permission level"))?,
    };

    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;
    if grantee == user.id {
        return Err(AppError::bad_request("Cannot grant permissions to yourself"));
    }
    if !state.store.user_exists(grantee).await? {
        return Err(AppError::not_found("User not found"));
    }

    let (status, grant) = match Grant::upsert(&state.pool, toolbox_id, grantee, level).await? {
        GrantOutcome::Created(grant) => (StatusCode::CREATED, grant),
        GrantOutcome::Changed(grant) => (StatusCode::OK, grant),
        GrantOutcome::Unchanged => {
            return Err(AppError::conflict("User already has this permission"));
        }
    };
    tracing::info!(toolbox_id = %toolbox_id, user_id = %grantee, level = ?level, "permission granted");
    Ok((status, Json(grant)))
}

#[axum::debug_handler]
pub async fn revoke_permission(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    let grantee = parse_id(&user_id, "user")?;
    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;

    if !Grant::revoke(&state.pool, toolbox_id, grantee).await? {
        return Err(AppError::not_found("Permission not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn list_tools(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::viewable_toolbox(state.store.as_ref(), viewer.id(), toolbox_id).await?;

    let page = Pagination::from_query(&query);
    let (tools, total) = Tool::list_in_toolbox(&state.pool, toolbox_id, page).await?;
    let tools = Tool::into_responses(tools, &state.pool, &state.config).await?;
    Ok(Json(Paginated::new(tools, total, page)))
}

#[axum::debug_handler]
pub async fn create_tool(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<CreateToolRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let toolbox_id = parse_id(&id, "toolbox")?;
    access::owned_toolbox(state.store.as_ref(), user.id, toolbox_id).await?;
    let name = require_text(req.name.as_deref(), "Name")?;

    let tool = Tool::create(&state.pool, toolbox_id, name, req).await?;
    tracing::info!(tool_id = %tool.id, toolbox_id = %toolbox_id, "tool created");
    Ok((StatusCode::CREATED, Json(tool.into_response(Vec::new(), false))))
}
