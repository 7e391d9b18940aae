use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub db_time: Option<DateTime<Utc>>,
    pub redis: String,
}

async fn database_status(state: &AppState) -> (String, Option<DateTime<Utc>>) {
    match sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()")
        .fetch_one(&state.pool)
        .await
    {
        Ok(time) => ("connected".to_string(), Some(time)),
        Err(e) => (format!("disconnected: {}", e), None),
    }
}

async fn redis_status(state: &AppState) -> String {
    let mut conn = match state.redis.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(e) => return format!("disconnected: {}", e),
    };
    match redis::cmd("PING").query_async::<String>(&mut conn).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("disconnected: {}", e),
    }
}

/// Always 200 so the container can come up before its dependencies.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (database, db_time) = database_status(&state).await;
    let redis = redis_status(&state).await;

    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        database,
        db_time,
        redis,
    })
}

#[axum::debug_handler]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "ready": false })),
            )
        }
    }
}
