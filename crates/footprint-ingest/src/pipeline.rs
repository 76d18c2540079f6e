//! Single-source extraction state machine and the multi-source batch.
//!
//! A source goes Locate -> Snapshot -> ledger start -> Extract -> ledger complete.
//! Failures before the ledger start leave no run row; failures after it always
//! close the row as `failed`.

use std::path::PathBuf;

use footprint_core::{ExtractCounts, RunStatus};
use footprint_store_sqlite::{RunCompletion, SqliteStore};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::collector::{Collector, CollectorRegistry};
use crate::config::{IngestConfig, SourceConfig};
use crate::discovery::locate_source;
use crate::snapshot::{take_snapshot, Snapshot};
use crate::{IngestError, IngestResult};

const ABORTED_RUN_MESSAGE: &str = "extraction aborted before completion";

/// Outcome of one source within a batch
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub status: RunStatus,
    /// Ledger row, absent when the source never reached extraction.
    pub run_id: Option<i64>,
    pub snapshot: Option<Snapshot>,
    pub counts: ExtractCounts,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

impl SourceReport {
    fn not_started(source: &str, err: &IngestError) -> Self {
        Self {
            source: source.to_string(),
            status: RunStatus::Failed,
            run_id: None,
            snapshot: None,
            counts: ExtractCounts::default(),
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Per-source reports for one batch, in execution order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub sources: Vec<SourceReport>,
    /// Rows left `running` by an earlier process and closed before this batch.
    pub abandoned_runs_closed: usize,
}

impl BatchReport {
    #[must_use]
    pub fn totals(&self) -> ExtractCounts {
        let mut totals = ExtractCounts::default();
        for report in &self.sources {
            totals += report.counts;
        }
        totals
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.sources.iter().filter(|report| !report.succeeded()).count()
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Orchestrates collectors against one store.
pub struct Pipeline<'a> {
    config: &'a IngestConfig,
    registry: &'a CollectorRegistry,
    store: &'a SqliteStore,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        config: &'a IngestConfig,
        registry: &'a CollectorRegistry,
        store: &'a SqliteStore,
    ) -> Self {
        Self { config, registry, store }
    }

    /// Path the named source currently resolves to.
    ///
    /// # Errors
    /// [`IngestError::UnknownSource`] for an unregistered name.
    pub fn locate(&self, name: &str) -> IngestResult<Option<PathBuf>> {
        let collector = self.registry.resolve(name)?;
        Ok(self.locate_collector(collector))
    }

    /// Run every registered source in registry order.
    pub fn run_all(&self) -> BatchReport {
        let names = self.registry.names();
        self.run_batch(&names)
    }

    /// Run the named sources in the given order.
    ///
    /// Unknown names are reported as failures without affecting the others.
    pub fn run_batch<S: AsRef<str>>(&self, names: &[S]) -> BatchReport {
        let abandoned_runs_closed = match self.store.fail_abandoned_runs() {
            Ok(closed) => closed,
            Err(err) => {
                error!(error = %err, "failed to close abandoned extraction runs");
                0
            }
        };

        let sources = names.iter().map(|name| self.run_source(name.as_ref())).collect();
        let report = BatchReport { sources, abandoned_runs_closed };

        let totals = report.totals();
        info!(
            sources = report.sources.len(),
            failed = report.failed(),
            added = totals.added,
            skipped = totals.skipped,
            dropped = totals.dropped,
            anomalies = totals.anomalies,
            "extraction batch finished"
        );
        report
    }

    /// Run one source end to end. Never panics on source errors; every failure
    /// is described by the returned report.
    pub fn run_source(&self, name: &str) -> SourceReport {
        match self.registry.resolve(name) {
            Ok(collector) => self.run_collector(collector),
            Err(err) => {
                warn!(source = name, error = %err, "skipping unknown source");
                SourceReport::not_started(name, &err)
            }
        }
    }

    fn locate_collector(&self, collector: &dyn Collector) -> Option<PathBuf> {
        let source = self.source_config(collector);
        locate_source(collector, &source, self.config.home().as_deref())
    }

    fn source_config(&self, collector: &dyn Collector) -> SourceConfig {
        self.config.source_or_discover(collector.name())
    }

    fn acquire(&self, collector: &dyn Collector) -> IngestResult<Snapshot> {
        let name = collector.name();
        let Some(path) = self.locate_collector(collector) else {
            let candidates = self
                .source_config(collector)
                .candidates
                .iter()
                .map(|candidate| self.config.expand(candidate).display().to_string())
                .collect();
            return Err(IngestError::SourceNotFound { source_name: name.to_string(), candidates });
        };
        let snapshot = take_snapshot(name, &path, &self.config.snapshot_dir)?;
        info!(
            source = name,
            origin = %path.display(),
            snapshot = %snapshot.path.display(),
            bytes = snapshot.bytes,
            "snapshot acquired"
        );
        Ok(snapshot)
    }

    fn run_collector(&self, collector: &dyn Collector) -> SourceReport {
        let name = collector.name();

        let snapshot = match self.acquire(collector) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(source = name, error = %err, "source unavailable; no run recorded");
                return SourceReport::not_started(name, &err);
            }
        };

        let run_id = match self.store.start_run(name) {
            Ok(run_id) => run_id,
            Err(err) => {
                let err = IngestError::Store(err);
                error!(source = name, error = %err, "failed to record run start");
                return SourceReport::not_started(name, &err);
            }
        };
        info!(source = name, run_id, "extraction started");
        let guard = RunGuard::new(self.store, run_id);

        let extracted = Connection::open(&snapshot.path)
            .map_err(IngestError::from)
            .and_then(|conn| collector.extract(&conn, self.store));

        let (counts, failure) = match extracted {
            Ok(counts) => (counts, None),
            Err(err) => (err.partial_counts(), Some(err)),
        };
        let message = failure.as_ref().map(ToString::to_string);
        let completion = RunCompletion {
            status: if failure.is_some() { RunStatus::Failed } else { RunStatus::Completed },
            added: counts.added,
            skipped: counts.skipped,
            error_message: message.as_deref(),
        };

        let mut report = SourceReport {
            source: name.to_string(),
            status: completion.status,
            run_id: Some(run_id),
            snapshot: Some(snapshot),
            counts,
            error_kind: failure.as_ref().map(IngestError::kind),
            error: message.clone(),
        };

        if let Err(err) = guard.finish(&completion) {
            error!(source = name, run_id, error = %err, "failed to record run completion");
            report.status = RunStatus::Failed;
            report.error_kind = report.error_kind.or(Some("store"));
            report.error = Some(match &message {
                Some(message) => format!("{message}; also failed to record completion: {err:#}"),
                None => format!("failed to record completion: {err:#}"),
            });
            return report;
        }

        match &failure {
            None => info!(
                source = name,
                run_id,
                added = counts.added,
                skipped = counts.skipped,
                dropped = counts.dropped,
                anomalies = counts.anomalies,
                "extraction completed"
            ),
            Some(err) => warn!(
                source = name,
                run_id,
                added = counts.added,
                skipped = counts.skipped,
                error = %err,
                "extraction failed"
            ),
        }
        report
    }
}

/// Closes a started run as `failed` unless it was finished explicitly.
struct RunGuard<'s> {
    store: &'s SqliteStore,
    run_id: i64,
    armed: bool,
}

impl<'s> RunGuard<'s> {
    fn new(store: &'s SqliteStore, run_id: i64) -> Self {
        Self { store, run_id, armed: true }
    }

    fn finish(mut self, completion: &RunCompletion<'_>) -> anyhow::Result<()> {
        self.store.complete_run(self.run_id, completion)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let completion = RunCompletion {
            status: RunStatus::Failed,
            added: 0,
            skipped: 0,
            error_message: Some(ABORTED_RUN_MESSAGE),
        };
        match self.store.complete_run(self.run_id, &completion) {
            Ok(()) => warn!(run_id = self.run_id, "extraction run aborted; marked failed"),
            Err(err) => error!(run_id = self.run_id, error = %err, "failed to close aborted run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: RunStatus, added: u64) -> SourceReport {
        SourceReport {
            source: "chrome".to_string(),
            status,
            run_id: Some(1),
            snapshot: None,
            counts: ExtractCounts { added, skipped: 1, dropped: 0, anomalies: 0 },
            error_kind: None,
            error: None,
        }
    }

    #[test]
    fn batch_totals_and_failures() {
        let batch = BatchReport {
            sources: vec![report(RunStatus::Completed, 2), report(RunStatus::Failed, 3)],
            abandoned_runs_closed: 0,
        };
        assert_eq!(batch.totals().added, 5);
        assert_eq!(batch.totals().skipped, 2);
        assert_eq!(batch.failed(), 1);
        assert!(!batch.all_succeeded());
        assert!(BatchReport::default().all_succeeded());
    }

    #[test]
    fn not_started_report_has_no_run() {
        let err = IngestError::UnknownSource("safari".to_string());
        let report = SourceReport::not_started("safari", &err);
        assert_eq!(report.run_id, None);
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.error_kind, Some("unknown_source"));
    }
}
