//! Resolution, backfill and notification endpoints

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::notify::mark_ready_for_personalization;
use crate::resolution::{BackfillParams, BackfillReport, BackfillScheduler, BatchReport, BatchRunner, SchedulerState};
use crate::AppState;
use cdp_common::{time, window_interval_from_secs};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResolveBatchRequest {
    pub tenant_id: Option<String>,
    pub batch_size: Option<usize>,
}

/// POST /resolve/batch
pub async fn resolve_batch(
    State(state): State<AppState>,
    Json(request): Json<ResolveBatchRequest>,
) -> ApiResult<Json<BatchReport>> {
    let batch_size = request.batch_size.unwrap_or(state.config.resolution.batch_size);
    if batch_size == 0 {
        return Err(ApiError::BadRequest("batch_size must be positive".to_string()));
    }

    let runner = BatchRunner::new(state.db.clone(), state.config.clone());
    let report = runner.run_batch(request.tenant_id.as_deref(), batch_size).await?;

    Ok(Json(report))
}

/// Backfill overrides; anything omitted comes from the scheduler configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackfillRequest {
    /// RFC 3339; defaults to now
    pub initial_target_time: Option<String>,
    pub floor_time: Option<String>,
    pub window_interval_secs: Option<u64>,
    pub max_iterations: Option<u64>,
    pub max_duration_secs: Option<u64>,
}

impl BackfillRequest {
    fn into_params(self, state: &AppState) -> ApiResult<BackfillParams> {
        let initial = match self.initial_target_time.as_deref() {
            Some(raw) => time::parse_rfc3339(raw)?,
            None => time::now(),
        };

        let mut params = BackfillParams::from_config(&state.config.scheduler, initial)?;
        if let Some(raw) = self.floor_time.as_deref() {
            params.floor_time = Some(time::parse_rfc3339(raw)?);
        }
        if let Some(secs) = self.window_interval_secs {
            params.window_interval = window_interval_from_secs(secs)?;
        }
        if let Some(max) = self.max_iterations {
            params.max_iterations = max;
        }
        if let Some(secs) = self.max_duration_secs {
            params.max_duration = std::time::Duration::from_secs(secs);
        }

        Ok(params)
    }
}

/// POST /resolve/backfill
///
/// Runs to a terminal state before responding. Only one backfill may run at a
/// time per process.
pub async fn run_backfill(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> ApiResult<Json<BackfillReport>> {
    let _guard = state
        .backfill_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("a backfill is already running".to_string()))?;

    let params = request.into_params(&state)?;
    let runner = BatchRunner::new(state.db.clone(), state.config.clone());
    let report = BackfillScheduler::new(runner).run(&params).await?;

    if report.outcome == SchedulerState::Failed {
        *state.last_error.write().await = report.error.clone();
    }

    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotifyRequest {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub master_profile_ids: Vec<Uuid>,
}

/// POST /notify/ready
pub async fn notify_ready(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> ApiResult<Json<NotifyResponse>> {
    let batch_size = request.batch_size.unwrap_or(state.config.resolution.batch_size);
    let master_profile_ids = mark_ready_for_personalization(&state.db, &state.config.database, batch_size).await?;

    Ok(Json(NotifyResponse { master_profile_ids }))
}

pub fn resolution_routes() -> Router<AppState> {
    Router::new()
        .route("/resolve/batch", post(resolve_batch))
        .route("/resolve/backfill", post(run_backfill))
        .route("/notify/ready", post(notify_ready))
}
