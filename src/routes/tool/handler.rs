use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use crate::{
    AppState,
    domain::{AccessStore, access},
    error::{AppError, AppResult},
    identity::CurrentUser,
    middleware::MaybeUser,
    utils::{PatchBuilder, parse_id, validation::require_text},
};

use super::model::{
    AddImageRequest, ImageResponse, MAX_IMAGES, Tool, ToolImage, ToolPatch, image_url,
    next_order_index,
};

/// Loads a tool and fails unless `user` owns the toolbox it lives in.
pub(crate) async fn owned_tool(state: &AppState, user: Uuid, tool_id: Uuid) -> AppResult<Tool> {
    let tool = Tool::find(&state.pool, tool_id)
        .await?
        .ok_or_else(|| AppError::not_found("Tool not found"))?;
    let toolbox = state
        .store
        .find_toolbox(tool.toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    if toolbox.owner_id != user {
        return Err(AppError::forbidden("You do not own this tool"));
    }
    Ok(tool)
}

/// HEAD against the public bucket. Skipped when no bucket URL is configured.
async fn image_exists(state: &AppState, key: &str) -> bool {
    if state.config.image_public_url.is_none() {
        return true;
    }
    let url = image_url(&state.config, key);
    match state.http.head(&url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::warn!(%url, "image existence check failed: {}", e);
            false
        }
    }
}

#[axum::debug_handler]
pub async fn get_one(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let tool = Tool::find(&state.pool, tool_id)
        .await?
        .ok_or_else(|| AppError::not_found("Tool not found"))?;

    let toolbox = state
        .store
        .find_toolbox(tool.toolbox_id)
        .await?
        .ok_or_else(|| AppError::not_found("Toolbox not found"))?;
    if !access::can_view(state.store.as_ref(), viewer.id(), &toolbox).await? {
        return Err(AppError::forbidden("You do not have access to this tool"));
    }

    Ok(Json(tool.into_response_one(&state.pool, &state.config).await?))
}

#[axum::debug_handler]
pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(patch), _): WithRejection<Json<ToolPatch>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    let target_toolbox = match patch.toolbox_id.as_deref() {
        Some(raw) => {
            let target = parse_id(raw, "toolbox")?;
            if target != tool.toolbox_id {
                let owns_target = state
                    .store
                    .find_toolbox(target)
                    .await?
                    .is_some_and(|tb| tb.owner_id == user.id);
                if !owns_target {
                    return Err(AppError::forbidden("You do not own the target toolbox"));
                }
            }
            Some(target)
        }
        None => None,
    };
    if let Some(name) = patch.name.as_deref() {
        require_text(Some(name), "Name")?;
    }

    let mut builder = PatchBuilder::new("tools");
    patch.apply(&mut builder, target_toolbox);
    if builder.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }

    let updated = Tool::update(&state.pool, tool.id, builder).await?;
    tracing::info!(tool_id = %updated.id, "tool updated");
    Ok(Json(updated.into_response_one(&state.pool, &state.config).await?))
}

#[axum::debug_handler]
pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    if !Tool::delete(&state.pool, tool.id).await? {
        return Err(AppError::conflict("Cannot delete a tool that is currently lent out"));
    }
    tracing::info!(tool_id = %tool.id, "tool deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn add_image(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<AddImageRequest>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let key = require_text(req.key.as_deref(), "Image key")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    let existing = ToolImage::for_tools(&state.pool, &[tool.id]).await?;
    if existing.len() as i64 >= MAX_IMAGES {
        return Err(AppError::conflict(format!(
            "Maximum of {MAX_IMAGES} images allowed per tool"
        )));
    }
    if !image_exists(&state, &key).await {
        return Err(AppError::bad_request(
            "Image not found. Please upload the image first.",
        ));
    }

    let order_index = next_order_index(req.order_index, &existing).ok_or_else(|| {
        AppError::conflict(format!("Maximum of {MAX_IMAGES} images allowed per tool"))
    })?;
    let image = ToolImage::insert(&state.pool, tool.id, &key, order_index).await?;

    Ok((
        StatusCode::CREATED,
        Json(ImageResponse {
            id: image.id,
            url: image_url(&state.config, &image.object_key),
            order_index: image.order_index,
        }),
    ))
}

#[axum::debug_handler]
pub async fn remove_image(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, image_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let tool_id = parse_id(&id, "tool")?;
    let image_id = parse_id(&image_id, "image")?;
    let tool = owned_tool(&state, user.id, tool_id).await?;

    let image = ToolImage::find(&state.pool, tool.id, image_id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    ToolImage::delete(&state.pool, image.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn shared(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(Tool::shared_by(&state.pool, user.id).await?))
}

#[axum::debug_handler]
pub async fn borrowed(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(Tool::borrowed_by(&state.pool, user.id).await?))
}
