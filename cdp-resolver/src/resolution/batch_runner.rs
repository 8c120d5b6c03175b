//! Resolution batch runner
//!
//! Pulls unresolved staged rows, oldest `received_at` first, and resolves each
//! one in its own transaction:
//!
//! 1. claim: stamp `processed_at` where it is still NULL (lost claim → skip)
//! 2. re-read the row and run the matcher on the same connection
//! 3. insert the seeded master, or consolidate into the matched one
//! 4. insert the link and commit
//!
//! A row that is already linked (its visitor was re-ingested after resolution)
//! skips the matcher: the new snapshot is consolidated into the linked master
//! and no second link is written.
//!
//! A failing row rolls back alone and stays unresolved for the next pass.
//! Rows of different tenants are resolved concurrently; rows of one tenant run
//! in `received_at` order.

use super::consolidator::{consolidate, seed_master};
use super::matcher::{find_match, MatchOutcome};
use crate::db;
use crate::models::{ProfileLink, RawProfileObservation, TimeWindow};
use crate::utils::{begin_monitored, retry_on_lock};
use cdp_common::{time, uuid_utils, EngineConfig, Error, Result};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Masters touched by a run, for downstream fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MasterChangeSet {
    pub created: Vec<Uuid>,
    pub updated: Vec<Uuid>,
}

impl MasterChangeSet {
    fn record_created(&mut self, id: Uuid) {
        if !self.created.contains(&id) {
            self.created.push(id);
        }
    }

    fn record_updated(&mut self, id: Uuid) {
        if !self.created.contains(&id) && !self.updated.contains(&id) {
            self.updated.push(id);
        }
    }

    fn absorb(&mut self, other: MasterChangeSet) {
        other.created.into_iter().for_each(|id| self.record_created(id));
        other.updated.into_iter().for_each(|id| self.record_updated(id));
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Aggregated counts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Unresolved rows pulled from staging
    pub pulled_count: usize,
    /// Rows stamped and linked by this run
    pub processed_count: usize,
    /// Rows that produced a new master
    pub newly_created_masters: usize,
    /// Rows linked to an already existing master (exact or fuzzy)
    pub linked_count: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    /// Re-ingested rows folded into the master they were already linked to
    pub refreshed_count: usize,
    /// Rows claimed by a concurrent runner first
    pub skipped_count: usize,
    /// Rows whose transaction failed; they stay unresolved
    pub failed_count: usize,
    pub changes: MasterChangeSet,
}

impl BatchReport {
    pub fn absorb(&mut self, other: BatchReport) {
        self.pulled_count += other.pulled_count;
        self.processed_count += other.processed_count;
        self.newly_created_masters += other.newly_created_masters;
        self.linked_count += other.linked_count;
        self.exact_matches += other.exact_matches;
        self.fuzzy_matches += other.fuzzy_matches;
        self.refreshed_count += other.refreshed_count;
        self.skipped_count += other.skipped_count;
        self.failed_count += other.failed_count;
        self.changes.absorb(other.changes);
    }

    fn record(&mut self, resolution: RowResolution) {
        match resolution {
            RowResolution::Claimed { outcome, master_profile_id } => {
                self.processed_count += 1;
                match outcome {
                    MatchOutcome::NewMaster => {
                        self.newly_created_masters += 1;
                        self.changes.record_created(master_profile_id);
                    }
                    MatchOutcome::ExactMatch { .. } => {
                        self.linked_count += 1;
                        self.exact_matches += 1;
                        self.changes.record_updated(master_profile_id);
                    }
                    MatchOutcome::FuzzyMatch { .. } => {
                        self.linked_count += 1;
                        self.fuzzy_matches += 1;
                        self.changes.record_updated(master_profile_id);
                    }
                }
            }
            RowResolution::Refreshed { master_profile_id } => {
                self.processed_count += 1;
                self.refreshed_count += 1;
                self.changes.record_updated(master_profile_id);
            }
            RowResolution::AlreadyClaimed => self.skipped_count += 1,
        }
    }
}

enum RowResolution {
    Claimed { outcome: MatchOutcome, master_profile_id: Uuid },
    Refreshed { master_profile_id: Uuid },
    AlreadyClaimed,
}

/// Runs Matcher → Consolidator over unresolved staging rows
#[derive(Clone)]
pub struct BatchRunner {
    pool: SqlitePool,
    config: Arc<EngineConfig>,
}

impl BatchRunner {
    pub fn new(pool: SqlitePool, config: Arc<EngineConfig>) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve up to `batch_size` unresolved rows, optionally for one tenant
    pub async fn run_batch(&self, tenant_scope: Option<&str>, batch_size: usize) -> Result<BatchReport> {
        self.run(tenant_scope, None, batch_size).await
    }

    /// Resolve up to `batch_size` unresolved rows received inside `window`
    pub async fn run_window(&self, window: &TimeWindow, batch_size: usize) -> Result<BatchReport> {
        self.run(None, Some(window), batch_size).await
    }

    async fn run(&self, tenant_scope: Option<&str>, window: Option<&TimeWindow>, batch_size: usize) -> Result<BatchReport> {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".to_string()));
        }

        let rows = {
            let mut conn = self.pool.acquire().await?;
            db::staging::fetch_unresolved(&mut conn, tenant_scope, window, batch_size).await?
        };

        Ok(self.resolve_pulled(rows).await)
    }

    /// Resolve rows that were already pulled from staging.
    ///
    /// Each row is claimed again inside its own transaction, so rows another
    /// runner resolved in the meantime are counted as skipped, never relinked.
    pub async fn resolve_pulled(&self, rows: Vec<RawProfileObservation>) -> BatchReport {
        let pass_id = uuid_utils::generate();
        let exclude_pass = if self.config.resolution.intra_pass_matching {
            None
        } else {
            Some(pass_id)
        };

        let mut report = BatchReport {
            pulled_count: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            return report;
        }

        let mut by_tenant: IndexMap<String, Vec<RawProfileObservation>> = IndexMap::new();
        for row in rows {
            by_tenant.entry(row.tenant_id.clone()).or_default().push(row);
        }

        tracing::debug!(
            pass_id = %pass_id,
            rows = report.pulled_count,
            tenants = by_tenant.len(),
            "Starting resolution pass"
        );

        let parallelism = self.config.resolution.tenant_parallelism.max(1);
        let tenant_reports: Vec<BatchReport> = stream::iter(by_tenant)
            .map(|(tenant_id, rows)| async move { self.resolve_tenant(&tenant_id, rows, pass_id, exclude_pass).await })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for tenant_report in tenant_reports {
            report.absorb(tenant_report);
        }

        tracing::info!(
            pass_id = %pass_id,
            pulled = report.pulled_count,
            processed = report.processed_count,
            new_masters = report.newly_created_masters,
            linked = report.linked_count,
            refreshed = report.refreshed_count,
            skipped = report.skipped_count,
            failed = report.failed_count,
            "Resolution pass complete"
        );

        report
    }

    async fn resolve_tenant(
        &self,
        tenant_id: &str,
        rows: Vec<RawProfileObservation>,
        pass_id: Uuid,
        exclude_pass: Option<Uuid>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for row in &rows {
            match self.resolve_row(row, pass_id, exclude_pass).await {
                Ok(resolution) => report.record(resolution),
                Err(err) => {
                    report.failed_count += 1;
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        raw_profile_id = %row.raw_profile_id,
                        error = %err,
                        "Row resolution failed, left unresolved for the next pass"
                    );
                }
            }
        }

        report
    }

    async fn resolve_row(
        &self,
        row: &RawProfileObservation,
        pass_id: Uuid,
        exclude_pass: Option<Uuid>,
    ) -> Result<RowResolution> {
        retry_on_lock("resolve row", self.config.database.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.pool, "batch_runner::resolve_row").await?;
            let now = time::now();

            if !db::staging::claim(tx.conn(), row.raw_profile_id, now).await? {
                tx.rollback().await?;
                tracing::debug!(raw_profile_id = %row.raw_profile_id, "Row already claimed");
                return Ok(RowResolution::AlreadyClaimed);
            }

            // Latest snapshot; the visitor may have been re-ingested since the pull
            let current = db::staging::load(tx.conn(), row.raw_profile_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("staged row {}", row.raw_profile_id)))?;

            if let Some(link) = db::links::find_by_raw(tx.conn(), current.raw_profile_id).await? {
                let master_profile_id = link.master_profile_id;
                let existing = db::masters::load(tx.conn(), master_profile_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("master profile {}", master_profile_id)))?;
                db::masters::update(tx.conn(), &consolidate(&existing, &current, now)).await?;
                tx.commit().await?;

                tracing::debug!(
                    tenant_id = %current.tenant_id,
                    raw_profile_id = %current.raw_profile_id,
                    master_profile_id = %master_profile_id,
                    "Re-ingested row folded into its linked master"
                );
                return Ok(RowResolution::Refreshed { master_profile_id });
            }

            let outcome = find_match(tx.conn(), &current, &self.config.matching, exclude_pass).await?;

            let master_profile_id = match outcome.master_profile_id() {
                None => {
                    let master = seed_master(&current, pass_id, now);
                    db::masters::insert(tx.conn(), &master).await?;
                    master.master_profile_id
                }
                Some(master_profile_id) => {
                    let existing = db::masters::load(tx.conn(), master_profile_id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("master profile {}", master_profile_id)))?;
                    db::masters::update(tx.conn(), &consolidate(&existing, &current, now)).await?;
                    master_profile_id
                }
            };

            db::links::insert(
                tx.conn(),
                &ProfileLink {
                    raw_profile_id: current.raw_profile_id,
                    master_profile_id,
                    match_rule: outcome.rule(),
                    matched_at: now,
                },
            )
            .await?;

            tx.commit().await?;

            tracing::debug!(
                tenant_id = %current.tenant_id,
                raw_profile_id = %current.raw_profile_id,
                master_profile_id = %master_profile_id,
                rule = %outcome.rule(),
                "Row resolved"
            );

            Ok(RowResolution::Claimed {
                outcome,
                master_profile_id,
            })
        })
        .await
    }

    /// Resolve every unresolved row in `window`.
    ///
    /// Repeats passes until one pulls fewer than `batch_size` rows or makes no
    /// progress; rows that keep failing are left for a later run.
    pub async fn drain_window(&self, window: &TimeWindow, batch_size: usize) -> Result<BatchReport> {
        let mut total = BatchReport::default();

        loop {
            let report = self.run_window(window, batch_size).await?;
            let exhausted = report.pulled_count < batch_size || report.processed_count == 0;
            total.absorb(report);
            if exhausted {
                return Ok(total);
            }
        }
    }
}
