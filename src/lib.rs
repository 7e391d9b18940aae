use std::sync::Arc;

use axum::Router;
use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;

use cache::IdentityCache;
use domain::CoreStore;
use identity::IdentityProvider;

pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    /// Persistence for the lending, buddy and access engine.
    pub store: Arc<dyn CoreStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub identity_cache: IdentityCache,
    pub http: reqwest::Client,
}

/// API routes nested under the configured base, with caller resolution and
/// 5xx logging applied. Rate limiting and CORS are added by the binary.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest(&state.config.api_base_uri, routes::api_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_caller,
        ))
        .layer(axum::middleware::from_fn(middleware::log_errors))
        .with_state(state)
}
