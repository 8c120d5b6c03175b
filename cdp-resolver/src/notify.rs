//! Downstream hand-off of changed masters
//!
//! `notified_at` is the watermark: a master is pending when it was never
//! handed off or has been updated since.

use crate::db;
use crate::utils::{begin_monitored, retry_on_lock};
use cdp_common::{time, DatabaseConfig, Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Stamp up to `batch_size` pending masters as ready for personalization.
///
/// Returns their ids, least recently updated first. Selection and stamping
/// happen in one transaction, so two callers never hand off the same change.
pub async fn mark_ready_for_personalization(
    pool: &SqlitePool,
    db_config: &DatabaseConfig,
    batch_size: usize,
) -> Result<Vec<Uuid>> {
    if batch_size == 0 {
        return Err(Error::InvalidInput("batch_size must be positive".to_string()));
    }

    let ids = retry_on_lock("mark ready for personalization", db_config.max_lock_wait_ms, || async move {
        let mut tx = begin_monitored(pool, "notify::mark_ready").await?;
        let ids = db::masters::pending_notification(tx.conn(), batch_size).await?;
        let now = time::now();
        for id in &ids {
            db::masters::mark_notified(tx.conn(), *id, now).await?;
        }
        tx.commit().await?;
        Ok(ids)
    })
    .await?;

    if !ids.is_empty() {
        tracing::info!(count = ids.len(), "Masters marked ready for personalization");
    }

    Ok(ids)
}
