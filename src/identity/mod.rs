//! Bearer token -> external identity.
//!
//! Handlers never look at tokens; the auth middleware resolves them through
//! the provider held in `AppState` and maps the result to a local user id.

mod jwt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;

pub use jwt::{JwtIdentityProvider, TokenClaims};

/// Who the auth provider says the caller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// Token expiry as unix seconds, when the provider knows it.
    pub expires_at: Option<i64>,
}

/// A caller resolved to a local user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Expired => AppError::Unauthorized("Token expired".into()),
            IdentityError::Invalid(_) => AppError::Unauthorized("Invalid token".into()),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

#[cfg(test)]
pub(crate) use jwt::sign_for_tests;
