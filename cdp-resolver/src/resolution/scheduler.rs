//! Windowed backfill scheduler
//!
//! Walks backward through ingestion history one window at a time:
//! `[target − interval, target)`, then `target −= interval`. Windows run
//! strictly in sequence. The loop stops on the iteration limit, the time
//! budget, or an optional floor, and always hands back a checkpoint that can
//! be passed as the next run's `initial_target_time`. Running out of
//! representable time counts as reaching the floor.
//!
//! Resolved rows are skipped by the watermark, so resuming from a checkpoint,
//! or overlapping a previous run, never resolves a row twice.

use super::batch_runner::{BatchReport, BatchRunner};
use crate::models::TimeWindow;
use async_trait::async_trait;
use cdp_common::{Error, Result, SchedulerConfig, MAX_WINDOW_INTERVAL_SECS};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Resolves everything unresolved inside one window
#[async_trait]
pub trait WindowRunner: Send + Sync {
    async fn resolve_window(&self, window: &TimeWindow) -> Result<BatchReport>;
}

#[async_trait]
impl WindowRunner for BatchRunner {
    async fn resolve_window(&self, window: &TimeWindow) -> Result<BatchReport> {
        self.drain_window(window, self.config().resolution.batch_size).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Reached `floor_time`
    Completed,
    TimeBudgetExceeded,
    IterationLimitExceeded,
    Failed,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SchedulerState::Idle | SchedulerState::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillParams {
    /// Exclusive upper bound of the first window; a previous run's checkpoint when resuming
    pub initial_target_time: DateTime<Utc>,
    pub window_interval: Duration,
    pub max_iterations: u64,
    pub max_duration: std::time::Duration,
    /// Stop with `Completed` once the next window would end at or before this
    pub floor_time: Option<DateTime<Utc>>,
}

impl BackfillParams {
    pub fn from_config(config: &SchedulerConfig, initial_target_time: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            initial_target_time,
            window_interval: config.window_interval()?,
            max_iterations: config.max_iterations,
            max_duration: config.max_duration(),
            floor_time: None,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.window_interval <= Duration::zero() {
            return Err(Error::InvalidInput("window_interval must be positive".to_string()));
        }
        if self.window_interval.num_seconds() > MAX_WINDOW_INTERVAL_SECS as i64 {
            return Err(Error::InvalidInput(format!(
                "window_interval must be at most {} seconds",
                MAX_WINDOW_INTERVAL_SECS
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidInput("max_iterations must be positive".to_string()));
        }
        if TimeWindow::ending_at(self.initial_target_time, self.window_interval).is_none() {
            return Err(Error::InvalidInput(format!(
                "no window of {} seconds ends at {}",
                self.window_interval.num_seconds(),
                self.initial_target_time
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub outcome: SchedulerState,
    /// Windows completed successfully
    pub iterations: u64,
    pub total_processed: usize,
    pub new_masters: usize,
    pub failed_rows: usize,
    /// Resume point: upper bound of the next window to process
    pub checkpoint: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Error that stopped a `Failed` run
    pub error: Option<String>,
}

pub struct BackfillScheduler<R> {
    runner: R,
    state: SchedulerState,
}

impl<R: WindowRunner> BackfillScheduler<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the backward loop to a terminal state.
    ///
    /// Data-layer failures do not surface as `Err`; they end the run in
    /// `Failed` with the failed window's upper bound as checkpoint. `Err` is
    /// only returned for unusable parameters.
    pub async fn run(&mut self, params: &BackfillParams) -> Result<BackfillReport> {
        params.validate()?;

        self.state = SchedulerState::Running;
        let started = Instant::now();
        let mut target = params.initial_target_time;
        let mut iterations = 0u64;
        let mut totals = BatchReport::default();
        let mut error = None;

        tracing::info!(
            initial_target_time = %params.initial_target_time,
            window_secs = params.window_interval.num_seconds(),
            max_iterations = params.max_iterations,
            max_duration_secs = params.max_duration.as_secs(),
            floor_time = ?params.floor_time,
            "Backfill started"
        );

        let outcome = loop {
            if params.floor_time.is_some_and(|floor| target <= floor) {
                break SchedulerState::Completed;
            }
            if iterations >= params.max_iterations {
                break SchedulerState::IterationLimitExceeded;
            }
            if started.elapsed() >= params.max_duration {
                break SchedulerState::TimeBudgetExceeded;
            }

            let Some(window) = TimeWindow::ending_at(target, params.window_interval) else {
                tracing::info!(checkpoint = %target, "Backfill reached the earliest representable time");
                break SchedulerState::Completed;
            };
            match self.runner.resolve_window(&window).await {
                Ok(report) => {
                    tracing::debug!(
                        iteration = iterations + 1,
                        window_start = %window.start,
                        window_end = %window.end,
                        processed = report.processed_count,
                        "Backfill window done"
                    );
                    totals.absorb(report);
                    iterations += 1;
                    target = window.start;
                }
                Err(err) => {
                    tracing::error!(
                        window_start = %window.start,
                        window_end = %window.end,
                        error = %err,
                        "Backfill window failed"
                    );
                    error = Some(err.to_string());
                    break SchedulerState::Failed;
                }
            }
        };

        self.state = outcome;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report = BackfillReport {
            outcome,
            iterations,
            total_processed: totals.processed_count,
            new_masters: totals.newly_created_masters,
            failed_rows: totals.failed_count,
            checkpoint: target,
            elapsed_ms,
            error,
        };

        if outcome == SchedulerState::Failed {
            tracing::warn!(checkpoint = %report.checkpoint, iterations, "Backfill stopped on error");
        } else {
            tracing::info!(
                outcome = ?outcome,
                iterations,
                processed = report.total_processed,
                checkpoint = %report.checkpoint,
                elapsed_ms,
                "Backfill finished"
            );
        }

        Ok(report)
    }
}
