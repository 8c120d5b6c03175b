//! Staging write path: buffer, deduplicate, flush

pub mod buffer;

pub use buffer::{BufferedObservation, StagingBuffer};

use crate::db;
use crate::models::{ProfileObservation, RawProfileObservation};
use crate::utils::{begin_monitored, retry_on_lock};
use cdp_common::{time, DatabaseConfig, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Write one flush unit in a single transaction.
///
/// Either every observation lands or none does; a lock-contended flush is
/// retried as a whole.
pub async fn flush<T>(
    pool: &SqlitePool,
    db_config: &DatabaseConfig,
    entries: &[BufferedObservation<T>],
    received_at: DateTime<Utc>,
) -> Result<Vec<RawProfileObservation>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let staged = retry_on_lock("staging flush", db_config.max_lock_wait_ms, || async move {
        let mut tx = begin_monitored(pool, "staging::flush").await?;
        let mut staged = Vec::with_capacity(entries.len());
        for entry in entries {
            staged.push(db::staging::upsert(tx.conn(), &entry.observation, received_at).await?);
        }
        tx.commit().await?;
        Ok(staged)
    })
    .await?;

    tracing::debug!(rows = staged.len(), "Flushed staging buffer");
    Ok(staged)
}

/// Buffer and flush a batch of already-normalized observations.
///
/// Used by bulk loaders that bypass transport records. Flushes every
/// `flush_batch_size` distinct observations and once more at the end.
pub async fn stage_observations(
    pool: &SqlitePool,
    db_config: &DatabaseConfig,
    flush_batch_size: usize,
    observations: Vec<ProfileObservation>,
) -> Result<Vec<RawProfileObservation>> {
    let mut buffer = StagingBuffer::new(flush_batch_size);
    let mut staged = Vec::new();

    for observation in observations {
        if buffer.push(observation, ()) {
            staged.extend(flush(pool, db_config, &buffer.drain(), time::now()).await?);
        }
    }
    staged.extend(flush(pool, db_config, &buffer.drain(), time::now()).await?);

    Ok(staged)
}
