use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::{
    AppState,
    domain::UserDirectory,
    error::AppError,
    identity::{CurrentUser, ExternalIdentity},
};

/// What the auth layer learned about the caller. Inserted into every
/// request; the extractors below decide what a handler requires.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    InvalidToken(String),
    /// Token is valid but no local user is linked to it yet.
    Unsynced(ExternalIdentity),
    User(CurrentUser),
}

pub async fn resolve_caller(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string());

    let caller = match token {
        None => Caller::Anonymous,
        Some(token) => identify(&state, &token).await.unwrap_or_else(|e| match e {
            AppError::Unauthorized(msg) => Caller::InvalidToken(msg),
            other => {
                tracing::error!("failed to resolve caller: {}", other);
                Caller::InvalidToken("Authentication failed".into())
            }
        }),
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

async fn identify(state: &AppState, token: &str) -> Result<Caller, AppError> {
    if let Some(id) = state.identity_cache.get(token).await {
        return Ok(Caller::User(CurrentUser { id }));
    }

    let identity = state.identity.resolve(token).await?;
    match state
        .store
        .find_user_id_by_external_id(&identity.subject)
        .await?
    {
        Some(id) => {
            state
                .identity_cache
                .put(token, id, identity.expires_at)
                .await;
            Ok(Caller::User(CurrentUser { id }))
        }
        None => Ok(Caller::Unsynced(identity)),
    }
}

fn caller(parts: &Parts) -> Caller {
    parts
        .extensions
        .get::<Caller>()
        .cloned()
        .unwrap_or(Caller::Anonymous)
}

fn unauthorized(caller: &Caller) -> AppError {
    match caller {
        Caller::InvalidToken(msg) => AppError::Unauthorized(msg.clone()),
        _ => AppError::Unauthorized("Missing or invalid authorization header".into()),
    }
}

/// Requires a synced local user.
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match caller(parts) {
            Caller::User(user) => Ok(user),
            Caller::Unsynced(_) => Err(AppError::not_found(
                "User not found. Please sync your account.",
            )),
            other => Err(unauthorized(&other)),
        }
    }
}

/// The caller if one is signed in; anonymous access otherwise. A bad
/// token degrades to anonymous.
#[derive(Debug, Clone, Copy)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn id(&self) -> Option<uuid::Uuid> {
        self.0.map(|u| u.id)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match caller(parts) {
            Caller::User(user) => Ok(MaybeUser(Some(user))),
            _ => Ok(MaybeUser(None)),
        }
    }
}

/// A verified token whether or not a local user exists; used by account sync.
#[derive(Debug, Clone)]
pub enum SyncCaller {
    Known(CurrentUser),
    New(ExternalIdentity),
}

impl<S: Send + Sync> FromRequestParts<S> for SyncCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match caller(parts) {
            Caller::User(user) => Ok(SyncCaller::Known(user)),
            Caller::Unsynced(identity) => Ok(SyncCaller::New(identity)),
            other => Err(unauthorized(&other)),
        }
    }
}
