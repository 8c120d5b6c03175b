//! Backfill over a real store: windows, checkpoints, resume

use std::sync::Arc;

use cdp_common::db::init_memory_database;
use cdp_common::EngineConfig;
use cdp_resolver::db;
use cdp_resolver::models::ProfileObservation;
use cdp_resolver::resolution::{BackfillParams, BackfillScheduler, BatchRunner, SchedulerState};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 28, 12, 0, 0).unwrap()
}

/// Stage one observation per offset (seconds before t0), each with its own phone
async fn seed(pool: &SqlitePool, offsets: &[i64]) {
    let mut conn = pool.acquire().await.unwrap();
    for (i, secs) in offsets.iter().enumerate() {
        let mut obs = ProfileObservation::new("demo", "website");
        obs.web_visitor_id = Some(format!("v-{}", i));
        obs.attributes.phone_number = Some(format!("09600000{:02}", i));
        db::staging::upsert(&mut conn, &obs, t0() - Duration::seconds(*secs))
            .await
            .unwrap();
    }
}

async fn unresolved(pool: &SqlitePool) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    db::staging::count_unresolved(&mut conn, None).await.unwrap()
}

fn params(initial: DateTime<Utc>, max_iterations: u64) -> BackfillParams {
    BackfillParams {
        initial_target_time: initial,
        window_interval: Duration::seconds(15),
        max_iterations,
        max_duration: std::time::Duration::from_secs(600),
        floor_time: None,
    }
}

async fn setup() -> (SqlitePool, BatchRunner) {
    let pool = init_memory_database().await.unwrap();
    let runner = BatchRunner::new(pool.clone(), Arc::new(EngineConfig::default()));
    (pool, runner)
}

#[tokio::test]
async fn iteration_limit_stops_with_resumable_checkpoint() {
    let (pool, runner) = setup().await;
    seed(&pool, &[5, 20, 40, 100]).await;

    let mut scheduler = BackfillScheduler::new(runner.clone());
    let report = scheduler.run(&params(t0(), 3)).await.unwrap();

    assert_eq!(report.outcome, SchedulerState::IterationLimitExceeded);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.total_processed, 3);
    assert_eq!(report.new_masters, 3);
    assert_eq!(report.checkpoint, t0() - Duration::seconds(45));
    assert_eq!(unresolved(&pool).await, 1);

    // Resume picks up only what lies beyond the checkpoint
    let mut resumed = BackfillScheduler::new(runner);
    let report = resumed.run(&params(report.checkpoint, 5)).await.unwrap();
    assert_eq!(report.total_processed, 1);
    assert_eq!(unresolved(&pool).await, 0);
}

#[tokio::test]
async fn overlapping_rerun_resolves_nothing_twice() {
    let (pool, runner) = setup().await;
    seed(&pool, &[5, 20]).await;

    let first = BackfillScheduler::new(runner.clone()).run(&params(t0(), 2)).await.unwrap();
    assert_eq!(first.total_processed, 2);

    let again = BackfillScheduler::new(runner).run(&params(t0(), 2)).await.unwrap();
    assert_eq!(again.total_processed, 0);
    assert_eq!(again.new_masters, 0);

    let masters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM master_profiles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(masters, 2);
}

#[tokio::test]
async fn floor_time_completes_after_covering_range() {
    let (pool, runner) = setup().await;
    seed(&pool, &[5, 20, 100]).await;

    let mut p = params(t0(), 100);
    p.floor_time = Some(t0() - Duration::seconds(30));
    let report = BackfillScheduler::new(runner).run(&p).await.unwrap();

    assert_eq!(report.outcome, SchedulerState::Completed);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.total_processed, 2);
    assert_eq!(unresolved(&pool).await, 1, "rows below the floor are left alone");
}

#[tokio::test]
async fn rows_at_window_upper_bound_belong_to_next_window() {
    let (pool, runner) = setup().await;
    // Exactly t0 is outside [t0 - 15s, t0)
    seed(&pool, &[0]).await;

    let report = BackfillScheduler::new(runner).run(&params(t0(), 1)).await.unwrap();

    assert_eq!(report.total_processed, 0);
    assert_eq!(unresolved(&pool).await, 1);
}
