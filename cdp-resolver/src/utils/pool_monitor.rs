//! Timed transactions
//!
//! Every per-row resolution runs inside one of these so slow pool acquisition
//! and long-held write locks show up in the logs with the caller's name.

use cdp_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

/// Transaction wrapper that logs how long the connection was held
pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.commit().await?;
        log_release(self.caller, held_ms, "commit");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.rollback().await?;
        log_release(self.caller, held_ms, "rollback");
        Ok(())
    }
}

fn log_release(caller: &'static str, held_ms: u128, how: &'static str) {
    if held_ms > 2000 {
        tracing::warn!(caller, held_ms, how, "Long transaction held the write lock");
    } else if held_ms > 1000 {
        tracing::info!(caller, held_ms, how, "Transaction held longer than expected");
    } else {
        tracing::trace!(caller, held_ms, how, "Transaction released");
    }
}

/// Begin a transaction, logging slow pool acquisition
pub async fn begin_monitored<'c>(pool: &'c SqlitePool, caller: &'static str) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;
    let wait_ms = start.elapsed().as_millis();

    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition, pool may be saturated");
    } else if wait_ms > 500 {
        tracing::info!(caller, wait_ms, "Connection acquisition slower than expected");
    }

    Ok(MonitoredTransaction {
        tx,
        caller,
        acquired_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_common::db::init_memory_database;

    #[tokio::test]
    async fn rollback_discards_writes() {
        let pool = init_memory_database().await.unwrap();

        let mut tx = begin_monitored(&pool, "test").await.unwrap();
        sqlx::query("CREATE TABLE scratch (id INTEGER)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'scratch'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(exists.is_none());
    }

    #[tokio::test]
    async fn commit_keeps_writes() {
        let pool = init_memory_database().await.unwrap();

        let mut tx = begin_monitored(&pool, "test").await.unwrap();
        sqlx::query("CREATE TABLE scratch (id INTEGER)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'scratch'")
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(exists.is_some());
    }
}
