//! Record ingestion endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::ingest::process_records;
use crate::models::{IngestRecord, RecordOutcome};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub records: Vec<IngestRecord>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub records: Vec<RecordOutcome>,
    pub failed_count: usize,
}

/// POST /ingest/records
///
/// Always 200: per-record failures are reported in the body so the transport
/// can redeliver exactly the failed records.
pub async fn ingest_records(State(state): State<AppState>, Json(request): Json<IngestRequest>) -> Json<IngestResponse> {
    let records = process_records(&state.db, &state.config, &request.records).await;
    let failed_count = records.iter().filter(|r| r.error.is_some()).count();

    Json(IngestResponse { records, failed_count })
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/ingest/records", post(ingest_records))
}
