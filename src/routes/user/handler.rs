use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{Datelike, Utc};

use crate::{
    AppState,
    domain::{AccessStore, BuddyService, UserDirectory},
    error::AppError,
    identity::{CurrentUser, ExternalIdentity},
    middleware::{MaybeUser, SyncCaller},
    routes::toolbox::model::Toolbox,
    utils::{
        Paginated, Pagination, PaginationQuery, PatchBuilder, parse_id,
        validation::{self, UsernameCheck, validate_username},
    },
};

use super::model::{
    CheckUsernameQuery, FollowResponse, NewUser, ProfileRow, SearchQuery, UserPatch,
    UsernameAvailability, Users, random_suffix, username_from_email, username_suggestions,
};

const SYNC_USERNAME_ATTEMPTS: usize = 5;

async fn load_profile(state: &AppState, id: uuid::Uuid) -> Result<ProfileRow, AppError> {
    Users::profile(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

#[axum::debug_handler]
pub async fn check_username(
    State(state): State<AppState>,
    Query(query): Query<CheckUsernameQuery>,
) -> Result<impl IntoResponse, AppError> {
    let username = query.username.unwrap_or_default();
    let username = username.trim();

    let invalid = match validation::check_username(username) {
        UsernameCheck::TooShort => {
            return Err(AppError::bad_request(
                "Username must be at least 3 characters",
            ));
        }
        UsernameCheck::Ok => None,
        _ => validate_username(username).err(),
    };
    if let Some(err) = invalid {
        return Ok(Json(UsernameAvailability {
            available: false,
            error: Some(err.to_string()),
            ..Default::default()
        }));
    }

    if Users::username_taken(&state.pool, username, None).await? {
        return Ok(Json(UsernameAvailability {
            available: false,
            suggestions: Some(username_suggestions(
                username,
                random_suffix(),
                Utc::now().year(),
            )),
            ..Default::default()
        }));
    }

    Ok(Json(UsernameAvailability {
        available: true,
        ..Default::default()
    }))
}

/// First call after sign-in. Links the external identity to a local user,
/// by external id, then by e-mail, creating the user if neither matches.
#[axum::debug_handler]
pub async fn sync(
    State(state): State<AppState>,
    caller: SyncCaller,
) -> Result<impl IntoResponse, AppError> {
    let identity = match caller {
        SyncCaller::Known(user) => {
            let profile = load_profile(&state, user.id).await?;
            return Ok((StatusCode::OK, Json(profile.into_profile(false, false))));
        }
        SyncCaller::New(identity) => identity,
    };

    let email = identity
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::bad_request("No email found in token"))?;

    if let Some(id) = Users::find_id_by_email(&state.pool, email).await? {
        Users::link_external_id(&state.pool, id, &identity.subject).await?;
        tracing::info!(user_id = %id, "linked existing user to external identity");
        let profile = load_profile(&state, id).await?;
        return Ok((StatusCode::OK, Json(profile.into_profile(false, false))));
    }

    let id = create_user(&state, &identity, email).await?;
    tracing::info!(user_id = %id, "user created on first sync");
    let profile = load_profile(&state, id).await?;
    Ok((StatusCode::CREATED, Json(profile.into_profile(false, false))))
}

async fn create_user(
    state: &AppState,
    identity: &ExternalIdentity,
    email: &str,
) -> Result<uuid::Uuid, AppError> {
    let mut username = username_from_email(email, random_suffix());
    for _ in 1..SYNC_USERNAME_ATTEMPTS {
        if !Users::username_taken(&state.pool, &username, None).await? {
            break;
        }
        username = username_from_email(email, random_suffix());
    }

    let display_name = identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&username)
        .to_string();

    let id = Users::create(
        &state.pool,
        NewUser {
            external_auth_id: &identity.subject,
            email,
            username: &username,
            display_name: &display_name,
            avatar_url: identity.picture.as_deref(),
        },
    )
    .await?;
    Ok(id)
}

#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = load_profile(&state, user.id).await?;
    Ok(Json(profile.into_profile(false, false)))
}

#[axum::debug_handler]
pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    WithRejection(Json(patch), _): WithRejection<Json<UserPatch>, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let current = load_profile(&state, user.id).await?;

    let mut username_changed = false;
    if let Some(username) = patch.username.as_deref() {
        validate_username(username)?;
        if Users::username_taken(&state.pool, username, Some(user.id)).await? {
            return Err(AppError::conflict("Username is already taken"));
        }
        username_changed = username != current.username;
    }

    let mut builder = PatchBuilder::new("users");
    patch.apply(&mut builder, username_changed);
    if builder.is_empty() {
        return Err(AppError::bad_request("No fields to update"));
    }
    Users::update(&state.pool, user.id, builder).await?;

    let profile = load_profile(&state, user.id).await?;
    Ok(Json(profile.into_profile(false, false)))
}

#[axum::debug_handler]
pub async fn my_buddies(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query);
    let (rows, total) = Users::buddies(&state.pool, user.id, page).await?;
    let profiles: Vec<_> = rows.into_iter().map(|r| r.into_profile(false, true)).collect();
    Ok(Json(Paginated::new(profiles, total, page)))
}

#[axum::debug_handler]
pub async fn remove_buddy(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let buddy = parse_id(&id, "buddy")?;
    BuddyService::new(state.store.as_ref())
        .remove(user.id, buddy)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn my_followers(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query);
    let (rows, total) = Users::followers(&state.pool, user.id, page).await?;
    let profiles: Vec<_> = rows.into_iter().map(|r| r.into_profile(false, false)).collect();
    Ok(Json(Paginated::new(profiles, total, page)))
}

#[axum::debug_handler]
pub async fn my_following(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination::from_query(&query);
    let (rows, total) = Users::following(&state.pool, user.id, page).await?;
    let profiles: Vec<_> = rows.into_iter().map(|r| r.into_profile(true, false)).collect();
    Ok(Json(Paginated::new(profiles, total, page)))
}

#[axum::debug_handler]
pub async fn search(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let term = query.q.as_deref().map(str::trim).unwrap_or_default();
    if term.chars().count() < 2 {
        return Err(AppError::bad_request(
            "Search query must be at least 2 characters",
        ));
    }

    let page = Pagination::from_query(&query.page);
    let (rows, total) = Users::search(&state.pool, term, page).await?;
    let profiles: Vec<_> = rows.into_iter().map(|r| r.into_profile(false, false)).collect();
    Ok(Json(Paginated::new(profiles, total, page)))
}

#[axum::debug_handler]
pub async fn profile(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id, "user")?;
    let profile = load_profile(&state, id).await?;

    let (is_following, is_buddy) = match viewer.id() {
        Some(me) if me != id => (
            Users::is_following(&state.pool, me, id).await?,
            state.store.is_buddy(me, id).await?,
        ),
        _ => (false, false),
    };

    Ok(Json(profile.into_profile(is_following, is_buddy)))
}

#[axum::debug_handler]
pub async fn follow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_id(&id, "user")?;
    if target == user.id {
        return Err(AppError::bad_request("Cannot follow yourself"));
    }
    if !state.store.user_exists(target).await? {
        return Err(AppError::not_found("User not found"));
    }

    Users::follow(&state.pool, user.id, target).await?;
    Ok((StatusCode::CREATED, Json(FollowResponse { message: "Followed" })))
}

#[axum::debug_handler]
pub async fn unfollow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_id(&id, "user")?;
    Users::unfollow(&state.pool, user.id, target).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn user_toolboxes(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    let owner = parse_id(&id, "user")?;
    let page = Pagination::from_query(&query);
    let (rows, total) = Toolbox::list_viewable(&state.pool, owner, viewer.id(), page).await?;
    Ok(Json(Paginated::new(rows, total, page)))
}
