//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::{db, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the store cannot be queried
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Staged rows still waiting for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    let unresolved_rows = match state.db.acquire().await {
        Ok(mut conn) => db::staging::count_unresolved(&mut conn, None).await.ok(),
        Err(_) => None,
    };
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if unresolved_rows.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "cdp-resolver".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        unresolved_rows,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
