//! cdp-resolver library interface
//!
//! Identity resolution engine: normalization, staging, matching,
//! consolidation, batch resolution and windowed backfill, plus the HTTP
//! control surface built on top of them.

pub mod api;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod resolution;
pub mod staging;
pub mod utils;
pub mod validators;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use cdp_common::EngineConfig;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<EngineConfig>,
    pub startup_time: DateTime<Utc>,
    /// Held for the duration of a backfill run
    pub backfill_lock: Arc<Mutex<()>>,
    /// Last backfill failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Arc<EngineConfig>) -> Self {
        Self {
            db,
            config,
            startup_time: Utc::now(),
            backfill_lock: Arc::new(Mutex::new(())),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::ingest_routes())
        .merge(api::resolution_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
