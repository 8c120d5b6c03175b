//! Lock-contention retry
//!
//! SQLite allows a single writer. When concurrent tenant workers collide, the
//! losing statement fails with "database is locked" after `busy_timeout`; this
//! helper retries the whole unit of work with exponential backoff until
//! `database.max_lock_wait_ms` is spent.

use cdp_common::{Error, Result};
use std::future::Future;
use tokio::time::{sleep, Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `operation`, retrying it while it fails with lock contention.
///
/// Backoff starts at 10ms and doubles up to 1s. Any other error is returned
/// immediately. Once `max_wait_ms` has elapsed the last lock error is surfaced
/// unchanged so callers still see a storage error.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_wait = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err: Error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    let elapsed_ms = start.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Store write succeeded only after a long lock wait"
                        );
                    } else {
                        tracing::debug!(operation = operation_name, attempt, elapsed_ms, "Store write succeeded after retry");
                    }
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_lock_contention() {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_wait {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis(),
                max_wait_ms,
                "Giving up: store still locked"
            );
            return Err(err);
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            remaining_ms = max_wait.saturating_sub(elapsed).as_millis(),
            "Store locked, retrying after backoff"
        );

        sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
