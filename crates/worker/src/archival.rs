//! Archival worker.
//!
//! Moves findings approaching their TTL from the hot store into cold storage.
//! Each record goes ACTIVE -> COLD_WRITTEN -> ARCHIVED: the cold object is
//! written and confirmed first, and only then is the hot copy removed with a
//! version-conditioned delete. A sweep interrupted between the two steps is
//! finished by a later sweep, which finds the cold object already present.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{health, metrics};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use findings_core::{
    ArchivalState, Error, Finding, HotRemoval, PipelineConfig, Result, RetentionDays,
};
use findings_store::{
    bounded, ArchiveObject, ColdObjectKey, ColdStorage, ExpiryCursor, FindingsStore,
    LifecycleReport, PurgeScope,
};

/// Ids currently being archived.
///
/// Shared between workers that sweep the same store so that a record is
/// never processed by two of them at once.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry(Arc<Mutex<HashSet<String>>>);

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Returns `None` when another worker holds it.
    pub fn try_acquire(&self, id: &str) -> Option<InFlightGuard> {
        if self.0.lock().insert(id.to_string()) {
            Some(InFlightGuard {
                registry: self.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its id on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightRegistry,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.0.lock().remove(&self.id);
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Candidates read from the store
    pub examined: usize,
    /// Records removed from the hot store, resumed ones included
    pub archived: usize,
    /// Records whose cold object was already present
    pub resumed: usize,
    /// Records left ACTIVE for the next sweep
    pub failed: usize,
    /// Records held or already archived by another worker
    pub skipped_in_flight: usize,
    /// The time budget ran out; the next sweep resumes from the checkpoint
    pub checkpointed: bool,
    pub duration_ms: u64,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            sweep_id: Uuid::new_v4(),
            started_at,
            examined: 0,
            archived: 0,
            resumed: 0,
            failed: 0,
            skipped_in_flight: 0,
            checkpointed: false,
            duration_ms: 0,
        }
    }
}

/// Point-in-time view of the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalStatus {
    pub enabled: bool,
    pub sweep_in_progress: bool,
    /// Encoded resume cursor left by a checkpointed sweep
    pub checkpoint: Option<String>,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Archived,
    Resumed,
    /// Removed by another worker between our read and our delete
    AlreadyArchived,
}

/// Per-record archival, cloned into each task.
#[derive(Clone)]
struct RecordArchiver {
    store: Arc<dyn FindingsStore>,
    cold: Arc<dyn ColdStorage>,
    retention: RetentionDays,
    hot_removal: HotRemoval,
    timeout: Duration,
}

impl RecordArchiver {
    async fn archive(&self, finding: Finding, archived_at: DateTime<Utc>) -> Result<RecordOutcome> {
        let key = ColdObjectKey::for_finding(&finding);
        let version = finding.version();
        let id = finding.id.clone();
        let mut state = ArchivalState::Active;

        let resumed = bounded("cold.exists", self.timeout, self.cold.exists(&key)).await?;
        if resumed {
            debug!(finding_id = %id, key = %key, "Cold object present, resuming hot removal");
            state = state.advance()?;
        } else {
            let object = ArchiveObject::new(finding, self.retention, archived_at);
            bounded("cold.put", self.timeout, self.cold.put(&key, &object)).await?;

            if !bounded("cold.exists", self.timeout, self.cold.exists(&key)).await? {
                return Err(Error::archival_consistency(
                    &id,
                    "cold object missing after write",
                ));
            }
            state = state.advance()?;
        }
        debug!(finding_id = %id, state = ?state, "Cold write confirmed");

        let removed = match self.hot_removal {
            HotRemoval::Delete => {
                bounded("store.delete", self.timeout, self.store.delete(&id, Some(version)))
                    .await?
            }
            HotRemoval::Tombstone => {
                bounded(
                    "store.mark_archived",
                    self.timeout,
                    self.store.mark_archived(&id, Some(version)),
                )
                .await?
            }
        };

        if !removed {
            let current = bounded("store.get", self.timeout, self.store.get(&id)).await?;
            return match current {
                Some(current) if current.version() == version && current.is_active() => Err(
                    Error::archival_consistency(&id, "hot removal rejected for unchanged record"),
                ),
                Some(current) if current.version() != version => Err(Error::archival_consistency(
                    &id,
                    "record re-ingested during archival; left active",
                )),
                _ => Ok(RecordOutcome::AlreadyArchived),
            };
        }

        state = state.advance()?;
        debug!(finding_id = %id, state = ?state, "Hot copy removed");

        Ok(if resumed {
            RecordOutcome::Resumed
        } else {
            RecordOutcome::Archived
        })
    }
}

/// Periodic archival of expiring findings.
pub struct ArchivalWorker {
    config: Arc<PipelineConfig>,
    store: Arc<dyn FindingsStore>,
    cold: Option<Arc<dyn ColdStorage>>,
    in_flight: InFlightRegistry,
    sweep_lock: tokio::sync::Mutex<()>,
    checkpoint: Mutex<Option<ExpiryCursor>>,
}

impl ArchivalWorker {
    /// Create a worker. Archival is disabled when `cold` is `None`; the TTL
    /// reaper still runs.
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn FindingsStore>,
        cold: Option<Arc<dyn ColdStorage>>,
    ) -> Self {
        Self {
            config,
            store,
            cold,
            in_flight: InFlightRegistry::new(),
            sweep_lock: tokio::sync::Mutex::new(()),
            checkpoint: Mutex::new(None),
        }
    }

    /// Share the in-flight registry with other workers.
    pub fn with_in_flight(mut self, registry: InFlightRegistry) -> Self {
        self.in_flight = registry;
        self
    }

    pub fn enabled(&self) -> bool {
        self.cold.is_some()
    }

    pub fn checkpoint(&self) -> Option<ExpiryCursor> {
        self.checkpoint.lock().clone()
    }

    pub fn status(&self) -> ArchivalStatus {
        ArchivalStatus {
            enabled: self.enabled(),
            sweep_in_progress: self.sweep_lock.try_lock().is_err(),
            checkpoint: self.checkpoint().map(|c| c.encode()),
            in_flight: self.in_flight.len(),
        }
    }

    fn cold(&self) -> Result<&Arc<dyn ColdStorage>> {
        self.cold
            .as_ref()
            .ok_or_else(|| Error::config("archival disabled: cold_storage_bucket is not set"))
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`. Fails with [`Error::SweepInProgress`] when a
    /// sweep of this worker is already running.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cold = self.cold()?.clone();
        let _running = self
            .sweep_lock
            .try_lock()
            .map_err(|_| Error::SweepInProgress)?;

        let timeout = self.config.call_timeout();
        if let Err(e) = bounded("cold.ping", timeout, cold.ping()).await {
            health().cold_storage.set_unhealthy(e.to_string());
            return Err(e);
        }
        health().cold_storage.set_healthy();

        let started = Instant::now();
        let mut report = SweepReport::new(now);
        let result = self.run_sweep(cold, now, started, &mut report).await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics().sweep_duration_ms.observe(report.duration_ms);
        metrics().records_archived.inc_by(report.archived as u64);
        metrics().records_resumed.inc_by(report.resumed as u64);
        metrics().archival_failures.inc_by(report.failed as u64);

        match result {
            Ok(()) => {
                if report.checkpointed {
                    metrics().sweeps_checkpointed.inc();
                } else {
                    metrics().sweeps_completed.inc();
                }
                info!(
                    sweep_id = %report.sweep_id,
                    examined = report.examined,
                    archived = report.archived,
                    resumed = report.resumed,
                    failed = report.failed,
                    skipped = report.skipped_in_flight,
                    checkpointed = report.checkpointed,
                    duration_ms = report.duration_ms,
                    "Archival sweep finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(sweep_id = %report.sweep_id, error = %e, "Archival sweep aborted");
                Err(e)
            }
        }
    }

    async fn run_sweep(
        &self,
        cold: Arc<dyn ColdStorage>,
        now: DateTime<Utc>,
        started: Instant,
        report: &mut SweepReport,
    ) -> Result<()> {
        let settings = &self.config.archival;
        let deadline = started + settings.time_budget();
        let horizon = now + self.config.lookahead_window();
        let semaphore = Arc::new(Semaphore::new(settings.concurrency));
        let archiver = RecordArchiver {
            store: self.store.clone(),
            cold,
            retention: self.config.retention_days,
            hot_removal: settings.hot_removal,
            timeout: self.config.call_timeout(),
        };

        let mut cursor = self.checkpoint.lock().clone();
        if let Some(ref resume) = cursor {
            info!(sweep_id = %report.sweep_id, cursor = %resume.encode(), "Resuming from checkpoint");
        }

        let mut dispatched = false;
        loop {
            if dispatched && Instant::now() >= deadline {
                self.save_checkpoint(cursor, report);
                return Ok(());
            }

            let page = match bounded(
                "store.expiring",
                archiver.timeout,
                self.store.expiring(horizon, cursor.as_ref(), settings.page_size),
            )
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    *self.checkpoint.lock() = cursor;
                    return Err(e);
                }
            };

            let mut tasks = JoinSet::new();
            let mut last_dispatched = None;
            let mut stopped_early = false;

            for finding in page.items {
                if dispatched && Instant::now() >= deadline {
                    stopped_early = true;
                    break;
                }
                report.examined += 1;
                dispatched = true;
                last_dispatched = Some(ExpiryCursor::after(&finding));

                let Some(guard) = self.in_flight.try_acquire(&finding.id) else {
                    debug!(finding_id = %finding.id, "Record in flight elsewhere, skipping");
                    report.skipped_in_flight += 1;
                    continue;
                };

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::internal(format!("archival semaphore closed: {}", e)))?;
                let archiver = archiver.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    let id = finding.id.clone();
                    (id, archiver.archive(finding, now).await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(RecordOutcome::Archived))) => report.archived += 1,
                    Ok((_, Ok(RecordOutcome::Resumed))) => {
                        report.archived += 1;
                        report.resumed += 1;
                    }
                    Ok((_, Ok(RecordOutcome::AlreadyArchived))) => report.skipped_in_flight += 1,
                    Ok((id, Err(e))) => {
                        warn!(finding_id = %id, error = %e, "Archival failed, record left active");
                        report.failed += 1;
                    }
                    Err(e) => {
                        error!(error = %e, "Archival task panicked");
                        report.failed += 1;
                    }
                }
            }

            if stopped_early {
                self.save_checkpoint(last_dispatched.or(cursor), report);
                return Ok(());
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    *self.checkpoint.lock() = None;
                    return Ok(());
                }
            }
        }
    }

    fn save_checkpoint(&self, cursor: Option<ExpiryCursor>, report: &mut SweepReport) {
        warn!(
            sweep_id = %report.sweep_id,
            budget_secs = self.config.archival.time_budget_secs,
            "Sweep time budget exhausted, checkpointing"
        );
        *self.checkpoint.lock() = cursor;
        report.checkpointed = true;
    }

    /// Which expired records the reaper may remove. With archival enabled an
    /// ACTIVE record is only ever removed by a sweep, after its cold write.
    pub fn purge_scope(&self) -> PurgeScope {
        if self.enabled() {
            PurgeScope::ArchivedOnly
        } else {
            PurgeScope::AnyStatus
        }
    }

    /// Delete hot records past their TTL. Without cold storage this is the
    /// only expiry path; with it, only tombstones are reaped.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let scope = self.purge_scope();
        let purged = bounded(
            "store.purge_expired",
            self.config.call_timeout(),
            self.store.purge_expired(now, scope),
        )
        .await?;

        if purged > 0 {
            metrics().ttl_expired.inc_by(purged);
            info!(purged, scope = ?scope, "Expired findings removed");
        }
        Ok(purged)
    }

    /// Apply cold tier transitions and expiry.
    pub async fn run_lifecycle(&self, now: DateTime<Utc>) -> Result<LifecycleReport> {
        let cold = self.cold()?;
        let report = match cold.apply_lifecycle(&self.config.cold_tiers, now).await {
            Ok(report) => report,
            Err(e) => {
                health().cold_storage.set_unhealthy(e.to_string());
                return Err(e);
            }
        };

        metrics()
            .cold_objects_transitioned
            .inc_by(report.transitioned as u64);
        metrics().cold_objects_expired.inc_by(report.expired as u64);
        info!(
            examined = report.examined,
            transitioned = report.transitioned,
            expired = report.expired,
            failed = report.failed,
            "Cold lifecycle pass finished"
        );
        Ok(report)
    }
}
