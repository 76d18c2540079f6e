//! Extraction run ledger: one row per ingestion attempt per source.

use anyhow::{anyhow, Context, Result};
use footprint_core::{now_unix, ExtractionRun, RunStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::{to_count, to_sql_count, SqliteStore};

const ABANDONED_RUN_MESSAGE: &str = "run was still marked running when a new batch started";

const RUN_COLUMNS: &str = "id, source, started_at, completed_at, records_added, records_skipped, \
                           status, error_message";

/// Final state written to a run row.
#[derive(Debug, Clone, Copy)]
pub struct RunCompletion<'a> {
    pub status: RunStatus,
    pub added: u64,
    pub skipped: u64,
    pub error_message: Option<&'a str>,
}

impl SqliteStore {
    /// Insert a `running` row for `source` and return its id.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn start_run(&self, source: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO extraction_runs (started_at, source, status) VALUES (?1, ?2, 'running')",
                params![now_unix(), source],
            )
            .with_context(|| format!("failed to start extraction run for {source}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a running row exactly once with its final status and counts.
    ///
    /// # Errors
    /// Returns an error when `completion.status` is `running`, when the run does not
    /// exist, or when it was already completed.
    pub fn complete_run(&self, run_id: i64, completion: &RunCompletion<'_>) -> Result<()> {
        if !completion.status.is_terminal() {
            return Err(anyhow!("run {run_id} cannot be completed with status running"));
        }

        let changed = self
            .conn
            .execute(
                "UPDATE extraction_runs
                 SET completed_at = ?1, records_added = ?2, records_skipped = ?3,
                     status = ?4, error_message = ?5
                 WHERE id = ?6 AND status = 'running'",
                params![
                    now_unix(),
                    to_sql_count(completion.added)?,
                    to_sql_count(completion.skipped)?,
                    completion.status.as_str(),
                    completion.error_message,
                    run_id
                ],
            )
            .with_context(|| format!("failed to complete extraction run {run_id}"))?;

        if changed == 0 {
            return match self.get_run(run_id)? {
                Some(run) => Err(anyhow!("run {run_id} is already {}", run.status.as_str())),
                None => Err(anyhow!("run {run_id} does not exist")),
            };
        }
        Ok(())
    }

    /// Completion time of the newest `completed` run for `source`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn last_successful_completion(&self, source: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT MAX(completed_at) FROM extraction_runs
                 WHERE source = ?1 AND status = 'completed'",
                params![source],
                |row| row.get::<_, Option<i64>>(0),
            )
            .with_context(|| format!("failed to read last successful completion for {source}"))
    }

    /// # Errors
    /// Returns an error when the query fails or the row cannot be decoded.
    pub fn get_run(&self, run_id: i64) -> Result<Option<ExtractionRun>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM extraction_runs WHERE id = ?1"),
                params![run_id],
                RawRun::from_row,
            )
            .optional()
            .with_context(|| format!("failed to load extraction run {run_id}"))?;
        raw.map(RawRun::into_run).transpose()
    }

    /// Newest runs first, optionally for one source only.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row cannot be decoded.
    pub fn list_runs(&self, source: Option<&str>, limit: usize) -> Result<Vec<ExtractionRun>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM extraction_runs
                 WHERE ?1 IS NULL OR source = ?1
                 ORDER BY id DESC
                 LIMIT ?2"
            ))
            .context("failed to prepare extraction run listing")?;
        let rows = stmt.query_map(params![source, limit], RawRun::from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("failed to decode extraction run row")?.into_run()?);
        }
        Ok(runs)
    }

    /// Mark rows left `running` by an interrupted process as `failed`.
    ///
    /// Only valid while no other writer is active.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn fail_abandoned_runs(&self) -> Result<usize> {
        let changed = self
            .conn
            .execute(
                "UPDATE extraction_runs
                 SET status = 'failed', completed_at = ?1, error_message = ?2
                 WHERE status = 'running'",
                params![now_unix(), ABANDONED_RUN_MESSAGE],
            )
            .context("failed to close abandoned extraction runs")?;
        if changed > 0 {
            tracing::warn!(runs = changed, "closed extraction runs abandoned by an earlier process");
        }
        Ok(changed)
    }
}

struct RawRun {
    id: i64,
    source: String,
    started_at: i64,
    completed_at: Option<i64>,
    records_added: Option<i64>,
    records_skipped: Option<i64>,
    status: Option<String>,
    error_message: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            started_at: row.get(2)?,
            completed_at: row.get(3)?,
            records_added: row.get(4)?,
            records_skipped: row.get(5)?,
            status: row.get(6)?,
            error_message: row.get(7)?,
        })
    }

    fn into_run(self) -> Result<ExtractionRun> {
        let status_text = self.status.as_deref().unwrap_or("running");
        let status = RunStatus::parse(status_text)
            .ok_or_else(|| anyhow!("run {} has unknown status {status_text}", self.id))?;
        Ok(ExtractionRun {
            id: self.id,
            source: self.source,
            started_at: self.started_at,
            completed_at: self.completed_at,
            records_added: to_count(self.records_added.unwrap_or(0))?,
            records_skipped: to_count(self.records_skipped.unwrap_or(0))?,
            status,
            error_message: self.error_message,
        })
    }
}
