//! Multi-source ingestion into the unified store.
//!
//! Each source database is copied to a private snapshot, read by its
//! [`Collector`], and written into [`footprint_store_sqlite::SqliteStore`] with
//! one extraction-run ledger row bracketing every attempt.

pub mod collector;
pub mod collectors;
pub mod config;
pub mod discovery;
pub mod pipeline;
pub mod snapshot;

use std::path::PathBuf;

use footprint_core::ExtractCounts;
use thiserror::Error;

pub use collector::{Collector, CollectorRegistry, PassWriter, SubPass};
pub use config::{IngestConfig, SourceConfig};
pub use pipeline::{BatchReport, Pipeline, SourceReport};
pub use snapshot::{take_snapshot, Snapshot};

/// Ingestion failure taxonomy. Every variant is scoped to a single source.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no source database found for {source_name} (checked: {})", .candidates.join(", "))]
    SourceNotFound { source_name: String, candidates: Vec<String> },
    #[error(
        "permission denied reading {} for {source_name}; grant Full Disk Access to this terminal \
         (System Settings > Privacy & Security > Full Disk Access) and retry",
        .path.display()
    )]
    SourceAccessDenied { source_name: String, path: PathBuf },
    #[error("failed to snapshot {} for {source_name}: {error}", .path.display())]
    SnapshotCopyFailed {
        source_name: String,
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("{source_name} extraction failed during {pass}: {message}")]
    ExtractionFailed { source_name: String, pass: &'static str, partial: ExtractCounts, message: String },
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    /// Stable machine-readable name for reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::SourceAccessDenied { .. } => "source_access_denied",
            Self::SnapshotCopyFailed { .. } => "snapshot_copy_failed",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::UnknownSource(_) => "unknown_source",
            Self::Config(_) => "config",
            Self::Sqlite(_) => "sqlite",
            Self::Io(_) => "io",
            Self::Store(_) => "store",
        }
    }

    /// Progress made before the failure, if the failure happened mid-extraction.
    #[must_use]
    pub fn partial_counts(&self) -> ExtractCounts {
        match self {
            Self::ExtractionFailed { partial, .. } => *partial,
            _ => ExtractCounts::default(),
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;
