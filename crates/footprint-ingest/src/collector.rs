//! The collector seam: one implementation per source schema.

use std::path::{Path, PathBuf};

use footprint_core::{ExtractCounts, Record, SpanDuration};
use footprint_store_sqlite::{InsertOutcome, SqliteStore};
use rusqlite::Connection;

use crate::collectors::{ChromeCollector, KnowledgeCCollector, MessagesCollector, PodcastsCollector};
use crate::{IngestError, IngestResult};

/// Reads one source snapshot and offers normalized records to the store.
pub trait Collector {
    /// Registry name. Also the ledger `source` value and the snapshot file stem.
    fn name(&self) -> &'static str;

    /// Best-effort location heuristic, used when no configured candidate exists.
    fn discover(&self, _home: &Path) -> Option<PathBuf> {
        None
    }

    /// Run every sub-pass against `source` and return the summed counts.
    ///
    /// # Errors
    /// [`IngestError::ExtractionFailed`] carrying the counts reached before the
    /// failing sub-pass stopped.
    fn extract(&self, source: &Connection, store: &SqliteStore) -> IngestResult<ExtractCounts>;
}

/// Ordered set of collectors, looked up by case-insensitive name.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in collectors in batch order.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(KnowledgeCCollector));
        registry.register(Box::new(MessagesCollector));
        registry.register(Box::new(ChromeCollector));
        registry.register(Box::new(PodcastsCollector));
        registry
    }

    /// Add a collector, replacing any existing one with the same name in place.
    pub fn register(&mut self, collector: Box<dyn Collector>) {
        match self.position(collector.name()) {
            Some(index) => self.collectors[index] = collector,
            None => self.collectors.push(collector),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Collector> {
        self.position(name).map(|index| self.collectors[index].as_ref())
    }

    /// Resolve a user-supplied name.
    ///
    /// # Errors
    /// [`IngestError::UnknownSource`] when no collector matches.
    pub fn resolve(&self, name: &str) -> IngestResult<&dyn Collector> {
        self.get(name).ok_or_else(|| IngestError::UnknownSource(name.to_string()))
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|collector| collector.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Collector> {
        self.collectors.iter().map(AsRef::as_ref)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.collectors
            .iter()
            .position(|collector| collector.name().eq_ignore_ascii_case(name))
    }
}

/// Counting sink for one sub-pass.
pub struct PassWriter<'s> {
    store: &'s SqliteStore,
    source: &'static str,
    pass: &'static str,
    counts: ExtractCounts,
}

impl<'s> PassWriter<'s> {
    #[must_use]
    pub fn new(store: &'s SqliteStore, source: &'static str, pass: &'static str) -> Self {
        Self { store, source, pass, counts: ExtractCounts::default() }
    }

    /// Insert a record; a duplicate counts as skipped.
    ///
    /// # Errors
    /// Returns the store's error when validation or the insert fails.
    pub fn offer(&mut self, record: &Record) -> anyhow::Result<()> {
        match self.store.insert(record)? {
            InsertOutcome::Inserted => self.counts.added += 1,
            InsertOutcome::AlreadyExists => self.counts.skipped += 1,
        }
        Ok(())
    }

    /// Count a row that failed a drop rule.
    pub fn drop_row(&mut self) {
        self.counts.dropped += 1;
    }

    /// Duration of a span, flagging `end < start` as an anomaly.
    pub fn measure(&mut self, start: i64, end: Option<i64>) -> Option<f64> {
        let span = SpanDuration::measure(start, end);
        if let SpanDuration::Inverted(seconds) = span {
            self.flag_anomaly("duration_seconds", seconds);
        }
        span.seconds()
    }

    /// Keep a non-negative quantity; a negative one is flagged and discarded.
    pub fn non_negative(&mut self, field: &'static str, value: Option<f64>) -> Option<f64> {
        match value {
            Some(seconds) if seconds < 0.0 || !seconds.is_finite() => {
                self.flag_anomaly(field, seconds);
                None
            }
            other => other,
        }
    }

    #[must_use]
    pub fn counts(&self) -> ExtractCounts {
        self.counts
    }

    fn flag_anomaly(&mut self, field: &'static str, value: impl std::fmt::Display) {
        self.counts.anomalies += 1;
        tracing::warn!(
            source = self.source,
            pass = self.pass,
            field,
            value = %value,
            "negative duration stored as absent"
        );
    }
}

/// A named extraction step over one source table or stream.
#[derive(Clone, Copy)]
pub struct SubPass {
    pub name: &'static str,
    pub run: fn(&Connection, &mut PassWriter<'_>) -> anyhow::Result<()>,
}

/// Run `passes` in order, summing their counts.
///
/// # Errors
/// Stops at the first failing pass with [`IngestError::ExtractionFailed`], whose
/// `partial` includes the rows that pass handled before failing.
pub fn run_passes(
    source_name: &'static str,
    source: &Connection,
    store: &SqliteStore,
    passes: &[SubPass],
) -> IngestResult<ExtractCounts> {
    let mut total = ExtractCounts::default();
    for pass in passes {
        let mut writer = PassWriter::new(store, source_name, pass.name);
        let outcome = (pass.run)(source, &mut writer);
        let counts = writer.counts();
        total += counts;

        if let Err(err) = outcome {
            return Err(IngestError::ExtractionFailed {
                source_name: source_name.to_string(),
                pass: pass.name,
                partial: total,
                message: format!("{err:#}"),
            });
        }
        tracing::debug!(
            source = source_name,
            pass = pass.name,
            added = counts.added,
            skipped = counts.skipped,
            dropped = counts.dropped,
            anomalies = counts.anomalies,
            "sub-pass finished"
        );
    }
    Ok(total)
}

/// Non-blank text, or `None`.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
