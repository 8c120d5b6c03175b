//! Transport record processing
//!
//! Each record is base64 JSON carrying one raw event. Records are decoded and
//! normalized one by one; valid observations go through the staging buffer
//! and are flushed in units. The outcome list mirrors the input order and
//! echoes every record's original `data` so the transport can redeliver
//! failures.

use crate::models::{IngestRecord, RawEventPayload, RecordOutcome};
use crate::staging::{self, BufferedObservation, StagingBuffer};
use crate::validators::normalize_event;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cdp_common::{time, EngineConfig};
use sqlx::SqlitePool;

fn decode_record(record: &IngestRecord) -> Result<RawEventPayload, String> {
    let bytes = STANDARD
        .decode(record.data.trim())
        .map_err(|e| format!("data is not valid base64: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("data is not a valid event: {}", e))
}

/// Decode, normalize, stage; one outcome per input record
pub async fn process_records(pool: &SqlitePool, config: &EngineConfig, records: &[IngestRecord]) -> Vec<RecordOutcome> {
    let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; records.len()];
    let mut buffer: StagingBuffer<usize> = StagingBuffer::new(config.staging.flush_batch_size);

    for (index, record) in records.iter().enumerate() {
        let observation = decode_record(record).and_then(|payload| normalize_event(&payload).map_err(|e| e.to_string()));

        match observation {
            Ok(observation) => {
                if buffer.push(observation, index) {
                    flush_unit(pool, config, records, &buffer.drain(), &mut outcomes).await;
                }
            }
            Err(message) => {
                tracing::warn!(record_id = %record.record_id, error = %message, "Rejected ingest record");
                outcomes[index] = Some(RecordOutcome::failed(record, message));
            }
        }
    }
    flush_unit(pool, config, records, &buffer.drain(), &mut outcomes).await;

    let outcomes: Vec<RecordOutcome> = outcomes
        .into_iter()
        .zip(records)
        .map(|(outcome, record)| outcome.unwrap_or_else(|| RecordOutcome::failed(record, "record was not processed")))
        .collect();

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    tracing::info!(records = records.len(), failed, "Processed ingest records");

    outcomes
}

async fn flush_unit(
    pool: &SqlitePool,
    config: &EngineConfig,
    records: &[IngestRecord],
    entries: &[BufferedObservation<usize>],
    outcomes: &mut [Option<RecordOutcome>],
) {
    if entries.is_empty() {
        return;
    }

    let result = staging::flush(pool, &config.database, entries, time::now()).await;
    if let Err(err) = &result {
        tracing::error!(observations = entries.len(), error = %err, "Staging flush failed, whole unit rejected");
    }

    for index in entries.iter().flat_map(|entry| entry.tags.iter().copied()) {
        outcomes[index] = Some(match &result {
            Ok(_) => RecordOutcome::ok(&records[index]),
            Err(err) => RecordOutcome::failed(&records[index], format!("staging failed: {}", err)),
        });
    }
}
