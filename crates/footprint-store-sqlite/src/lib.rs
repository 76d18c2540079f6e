use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use footprint_core::{DeviceInterval, Record, RecordKind};
use rusqlite::{params, Connection, DatabaseName, Params};
use serde::{Deserialize, Serialize};

mod ledger;

pub use ledger::RunCompletion;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS extraction_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  started_at INTEGER NOT NULL,
  completed_at INTEGER,
  source TEXT NOT NULL,
  records_added INTEGER DEFAULT 0,
  records_skipped INTEGER DEFAULT 0,
  status TEXT DEFAULT 'running' CHECK (status IN ('running','completed','failed'))
);

CREATE TABLE IF NOT EXISTS app_usage (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  bundle_id TEXT NOT NULL,
  start_time INTEGER NOT NULL,
  end_time INTEGER,
  duration_seconds REAL,
  device_id TEXT,
  device_model TEXT,
  source_db TEXT DEFAULT 'knowledgeC'
);

CREATE TABLE IF NOT EXISTS web_visits (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  url TEXT NOT NULL,
  title TEXT,
  visit_time INTEGER NOT NULL,
  visit_duration_seconds REAL,
  transition_type TEXT,
  browser TEXT DEFAULT 'chrome'
);

CREATE TABLE IF NOT EXISTS bluetooth_connections (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  device_name TEXT,
  device_address TEXT,
  device_type INTEGER,
  product_id INTEGER,
  start_time INTEGER NOT NULL,
  end_time INTEGER,
  duration_seconds REAL
);

CREATE TABLE IF NOT EXISTS notifications (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  bundle_id TEXT NOT NULL,
  event_type TEXT,
  timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  text TEXT,
  is_from_me INTEGER,
  timestamp INTEGER NOT NULL,
  date_read INTEGER,
  date_delivered INTEGER,
  handle_id TEXT,
  chat_id TEXT,
  service TEXT,
  has_attachment INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chats (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  chat_identifier TEXT,
  display_name TEXT,
  participant_count INTEGER,
  last_message_time INTEGER
);

CREATE TABLE IF NOT EXISTS contacts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  handle_id TEXT NOT NULL,
  display_name TEXT,
  service TEXT
);

CREATE TABLE IF NOT EXISTS podcast_episodes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  episode_title TEXT,
  show_title TEXT,
  show_uuid TEXT,
  duration_seconds REAL,
  played_seconds REAL,
  play_count INTEGER,
  last_played_at INTEGER,
  published_at INTEGER
);

CREATE TABLE IF NOT EXISTS podcast_shows (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  title TEXT NOT NULL,
  author TEXT,
  feed_url TEXT,
  subscribed_at INTEGER,
  episode_count INTEGER
);

CREATE TABLE IF NOT EXISTS intents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  intent_class TEXT,
  intent_verb TEXT,
  bundle_id TEXT,
  timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS display_state (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  record_hash TEXT UNIQUE NOT NULL,
  is_backlit INTEGER,
  start_time INTEGER NOT NULL,
  end_time INTEGER,
  duration_seconds REAL
);

CREATE INDEX IF NOT EXISTS idx_app_usage_time ON app_usage(start_time);
CREATE INDEX IF NOT EXISTS idx_app_usage_bundle ON app_usage(bundle_id);
CREATE INDEX IF NOT EXISTS idx_web_visits_time ON web_visits(visit_time);
CREATE INDEX IF NOT EXISTS idx_messages_time ON messages(timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_handle ON messages(handle_id);
CREATE INDEX IF NOT EXISTS idx_contacts_handle ON contacts(handle_id);
CREATE INDEX IF NOT EXISTS idx_notifications_time ON notifications(timestamp);
CREATE INDEX IF NOT EXISTS idx_bluetooth_time ON bluetooth_connections(start_time);
CREATE INDEX IF NOT EXISTS idx_podcast_episodes_played ON podcast_episodes(last_played_at);
CREATE INDEX IF NOT EXISTS idx_extraction_runs_source ON extraction_runs(source, status);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE extraction_runs ADD COLUMN error_message TEXT;
";

// Every insert targets only the record_hash uniqueness constraint; any other
// constraint failure is a real error.
const INSERT_APP_USAGE_SQL: &str = r"
INSERT INTO app_usage
  (record_hash, bundle_id, start_time, end_time, duration_seconds, device_id, device_model)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_WEB_VISIT_SQL: &str = r"
INSERT INTO web_visits
  (record_hash, url, title, visit_time, visit_duration_seconds, transition_type, browser)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_BLUETOOTH_SQL: &str = r"
INSERT INTO bluetooth_connections
  (record_hash, device_name, device_address, device_type, product_id, start_time, end_time, duration_seconds)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_NOTIFICATION_SQL: &str = r"
INSERT INTO notifications (record_hash, bundle_id, event_type, timestamp)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_MESSAGE_SQL: &str = r"
INSERT INTO messages
  (record_hash, text, is_from_me, timestamp, date_read, date_delivered,
   handle_id, chat_id, service, has_attachment)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_CHAT_SQL: &str = r"
INSERT INTO chats
  (record_hash, chat_identifier, display_name, participant_count, last_message_time)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_CONTACT_SQL: &str = r"
INSERT INTO contacts (record_hash, handle_id, display_name, service)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_PODCAST_EPISODE_SQL: &str = r"
INSERT INTO podcast_episodes
  (record_hash, episode_title, show_title, show_uuid, duration_seconds,
   played_seconds, play_count, last_played_at, published_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_PODCAST_SHOW_SQL: &str = r"
INSERT INTO podcast_shows
  (record_hash, title, author, feed_url, subscribed_at, episode_count)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_INTENT_SQL: &str = r"
INSERT INTO intents (record_hash, intent_class, intent_verb, bundle_id, timestamp)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(record_hash) DO NOTHING
";

const INSERT_DISPLAY_STATE_SQL: &str = r"
INSERT INTO display_state (record_hash, is_backlit, start_time, end_time, duration_seconds)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(record_hash) DO NOTHING
";

pub struct SqliteStore {
    conn: Connection,
}

/// Result of offering a record to the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[must_use]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same `record_hash` is already stored; nothing was written.
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceActivity {
    pub source: String,
    pub runs: u64,
    pub failed_runs: u64,
    pub last_successful_completion: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub tables: Vec<TableCount>,
    pub total_records: u64,
    pub sources: Vec<SourceActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open the unified store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            if path != Path::new(":memory:") {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create parent directory for {}", path.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        let legacy = table_exists(&self.conn, "extraction_runs")?;

        // Idempotent DDL: fills in any tables or indexes an older layout lacked.
        apply_migration_1(&self.conn)?;

        if legacy {
            tracing::info!("adopting unversioned unified database");
            if table_has_column(&self.conn, "extraction_runs", "error_message")? {
                record_schema_version(&self.conn, 2)?;
                return Ok(2);
            }
        }

        Ok(1)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration 2 transaction")?;
        if !table_has_column(&tx, "extraction_runs", "error_message")? {
            tx.execute_batch(MIGRATION_002_SQL)
                .context("failed to add extraction_runs.error_message")?;
        }
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration 2")?;
        Ok(())
    }

    /// Offer one record to its table. Existing rows are never overwritten.
    ///
    /// # Errors
    /// Returns an error when the record fails validation or the insert fails for any
    /// reason other than an existing `record_hash`.
    pub fn insert(&self, record: &Record) -> Result<InsertOutcome> {
        let table = record.kind().table_name();
        record
            .validate()
            .with_context(|| format!("refusing to store invalid {table} record"))?;

        let changed = match record {
            Record::AppUsage(r) => self.execute_cached(
                INSERT_APP_USAGE_SQL,
                params![
                    r.record_hash,
                    r.bundle_id,
                    r.start_time,
                    r.end_time,
                    r.duration_seconds,
                    r.device_id,
                    r.device_model
                ],
            ),
            Record::WebVisit(r) => self.execute_cached(
                INSERT_WEB_VISIT_SQL,
                params![
                    r.record_hash,
                    r.url,
                    r.title,
                    r.visit_time,
                    r.visit_duration_seconds,
                    r.transition_type,
                    r.browser
                ],
            ),
            Record::BluetoothConnection(r) => self.execute_cached(
                INSERT_BLUETOOTH_SQL,
                params![
                    r.record_hash,
                    r.device_name,
                    r.device_address,
                    r.device_type,
                    r.product_id,
                    r.start_time,
                    r.end_time,
                    r.duration_seconds
                ],
            ),
            Record::Notification(r) => self.execute_cached(
                INSERT_NOTIFICATION_SQL,
                params![r.record_hash, r.bundle_id, r.event_type, r.timestamp],
            ),
            Record::Message(r) => self.execute_cached(
                INSERT_MESSAGE_SQL,
                params![
                    r.record_hash,
                    r.text,
                    r.is_from_me,
                    r.timestamp,
                    r.date_read,
                    r.date_delivered,
                    r.handle_id,
                    r.chat_id,
                    r.service,
                    r.has_attachment
                ],
            ),
            Record::Chat(r) => self.execute_cached(
                INSERT_CHAT_SQL,
                params![
                    r.record_hash,
                    r.chat_identifier,
                    r.display_name,
                    r.participant_count,
                    r.last_message_time
                ],
            ),
            Record::Contact(r) => self.execute_cached(
                INSERT_CONTACT_SQL,
                params![r.record_hash, r.handle_id, r.display_name, r.service],
            ),
            Record::PodcastEpisode(r) => self.execute_cached(
                INSERT_PODCAST_EPISODE_SQL,
                params![
                    r.record_hash,
                    r.episode_title,
                    r.show_title,
                    r.show_uuid,
                    r.duration_seconds,
                    r.played_seconds,
                    r.play_count,
                    r.last_played_at,
                    r.published_at
                ],
            ),
            Record::PodcastShow(r) => self.execute_cached(
                INSERT_PODCAST_SHOW_SQL,
                params![
                    r.record_hash,
                    r.title,
                    r.author,
                    r.feed_url,
                    r.subscribed_at,
                    r.episode_count
                ],
            ),
            Record::Intent(r) => self.execute_cached(
                INSERT_INTENT_SQL,
                params![r.record_hash, r.intent_class, r.intent_verb, r.bundle_id, r.timestamp],
            ),
            Record::DisplayState(r) => self.execute_cached(
                INSERT_DISPLAY_STATE_SQL,
                params![r.record_hash, r.is_backlit, r.start_time, r.end_time, r.duration_seconds],
            ),
        }
        .with_context(|| format!("failed to insert into {table}"))?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    /// Number of stored rows of one record kind.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count(&self, kind: RecordKind) -> Result<u64> {
        count_rows(&self.conn, kind.table_name())
    }

    /// Raw bluetooth connection spans with a device name and both endpoints.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn bluetooth_intervals(&self) -> Result<Vec<DeviceInterval>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT device_name, start_time, end_time
                 FROM bluetooth_connections
                 WHERE device_name IS NOT NULL AND end_time IS NOT NULL
                 ORDER BY start_time",
            )
            .context("failed to prepare bluetooth interval query")?;
        let rows = stmt.query_map([], |row| {
            Ok(DeviceInterval { device: row.get(0)?, start: row.get(1)?, end: row.get(2)? })
        })?;

        let mut intervals = Vec::new();
        for row in rows {
            intervals.push(row.context("failed to decode bluetooth interval row")?);
        }
        Ok(intervals)
    }

    /// Per-table row counts and per-source ledger summary.
    ///
    /// # Errors
    /// Returns an error when any count or ledger query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut tables = Vec::with_capacity(RecordKind::ALL.len());
        let mut total_records = 0_u64;
        for kind in RecordKind::ALL {
            let rows = self.count(kind)?;
            total_records += rows;
            tables.push(TableCount { table: kind.table_name().to_string(), rows });
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT source,
                        COUNT(*),
                        SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                        MAX(CASE WHEN status = 'completed' THEN completed_at END)
                 FROM extraction_runs
                 GROUP BY source
                 ORDER BY source",
            )
            .context("failed to prepare source activity query")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut sources = Vec::new();
        for row in rows {
            let (source, runs, failed_runs, last_successful_completion) =
                row.context("failed to decode source activity row")?;
            sources.push(SourceActivity {
                source,
                runs: to_count(runs)?,
                failed_runs: to_count(failed_runs)?,
                last_successful_completion,
            });
        }

        Ok(StoreStats { tables, total_records, sources })
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status,
        })
    }

    fn execute_cached<P: Params>(&self, sql: &str, params: P) -> rusqlite::Result<usize> {
        self.conn.prepare_cached(sql)?.execute(params)
    }
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
    record_schema_version(conn, 1)?;
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let rows = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
        .with_context(|| format!("failed to count rows in {table}"))?;
    to_count(rows)
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("negative count {value} read from store"))
}

fn to_sql_count(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("count {value} exceeds sqlite integer range"))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "extraction_runs")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "extraction_runs", "error_message")? {
        return Ok((2, true));
    }

    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use footprint_core::{AppUsageSession, BluetoothConnection, Contact, RunStatus};

    use super::*;

    fn migrated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn app_usage(record_hash: &str, bundle_id: &str) -> Record {
        Record::AppUsage(AppUsageSession {
            record_hash: record_hash.to_string(),
            bundle_id: bundle_id.to_string(),
            start_time: 1_672_531_200,
            end_time: Some(1_672_531_500),
            duration_seconds: Some(300.0),
            device_id: Some("DEVICE-1".to_string()),
            device_model: None,
        })
    }

    fn bluetooth(record_hash: &str, name: Option<&str>, start: i64, end: Option<i64>) -> Record {
        Record::BluetoothConnection(BluetoothConnection {
            record_hash: record_hash.to_string(),
            device_name: name.map(ToString::to_string),
            device_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            device_type: Some(1),
            product_id: None,
            start_time: start,
            end_time: end,
            duration_seconds: None,
        })
    }

    // Test IDs: TSTORE-001
    #[test]
    fn migrate_creates_every_record_table_and_index() -> Result<()> {
        let store = migrated_store()?;
        for kind in RecordKind::ALL {
            assert!(table_exists(&store.conn, kind.table_name())?, "{}", kind.table_name());
        }
        assert!(table_exists(&store.conn, "extraction_runs")?);
        assert!(table_has_column(&store.conn, "extraction_runs", "error_message")?);

        let indexes: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(indexes, 10);

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 2);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    // Test IDs: TSTORE-002
    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut store = migrated_store()?;
        store.migrate()?;
        assert_eq!(store.schema_status()?.current_version, 2);
        Ok(())
    }

    // Test IDs: TSTORE-003
    #[test]
    fn duplicate_hash_is_reported_not_overwritten() -> Result<()> {
        let store = migrated_store()?;

        assert_eq!(store.insert(&app_usage("hash-1", "com.apple.Safari"))?, InsertOutcome::Inserted);
        assert_eq!(
            store.insert(&app_usage("hash-1", "com.apple.Mail"))?,
            InsertOutcome::AlreadyExists
        );
        assert_eq!(store.count(RecordKind::AppUsage)?, 1);

        let bundle: String = store.conn.query_row(
            "SELECT bundle_id FROM app_usage WHERE record_hash = 'hash-1'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(bundle, "com.apple.Safari");
        Ok(())
    }

    // Test IDs: TSTORE-004
    #[test]
    fn same_hash_in_different_tables_is_independent() -> Result<()> {
        let store = migrated_store()?;
        assert_eq!(store.insert(&app_usage("shared", "com.apple.Safari"))?, InsertOutcome::Inserted);
        assert_eq!(
            store.insert(&bluetooth("shared", Some("AirPods"), 10, Some(20)))?,
            InsertOutcome::Inserted
        );
        Ok(())
    }

    // Test IDs: TSTORE-005
    #[test]
    fn invalid_records_are_rejected_before_write() -> Result<()> {
        let store = migrated_store()?;
        let mut negative = app_usage("hash-neg", "com.apple.Safari");
        if let Record::AppUsage(session) = &mut negative {
            session.duration_seconds = Some(-30.0);
        }
        assert!(store.insert(&negative).is_err());

        let blank = Record::Contact(Contact {
            record_hash: "hash-contact".to_string(),
            handle_id: String::new(),
            display_name: None,
            service: None,
        });
        assert!(store.insert(&blank).is_err());

        assert_eq!(store.count(RecordKind::AppUsage)?, 0);
        assert_eq!(store.count(RecordKind::Contact)?, 0);
        Ok(())
    }

    // Test IDs: TSTORE-006
    #[test]
    fn bluetooth_intervals_skip_rows_without_name_or_end() -> Result<()> {
        let store = migrated_store()?;
        let _ = store.insert(&bluetooth("a", Some("AirPods"), 100, Some(200)))?;
        let _ = store.insert(&bluetooth("b", None, 150, Some(250)))?;
        let _ = store.insert(&bluetooth("c", Some("Keyboard"), 300, None))?;
        let _ = store.insert(&bluetooth("d", Some("Keyboard"), 50, Some(60)))?;

        let intervals = store.bluetooth_intervals()?;
        assert_eq!(
            intervals,
            vec![
                DeviceInterval { device: "Keyboard".to_string(), start: 50, end: 60 },
                DeviceInterval { device: "AirPods".to_string(), start: 100, end: 200 },
            ]
        );
        Ok(())
    }

    // Test IDs: TSTORE-007
    #[test]
    fn stats_report_table_counts_and_source_activity() -> Result<()> {
        let store = migrated_store()?;
        let _ = store.insert(&app_usage("a", "com.apple.Safari"))?;
        let _ = store.insert(&app_usage("b", "com.apple.Mail"))?;

        let ok = store.start_run("knowledgeC")?;
        store.complete_run(
            ok,
            &RunCompletion { status: RunStatus::Completed, added: 2, skipped: 0, error_message: None },
        )?;
        let failed = store.start_run("knowledgeC")?;
        store.complete_run(
            failed,
            &RunCompletion {
                status: RunStatus::Failed,
                added: 0,
                skipped: 0,
                error_message: Some("boom"),
            },
        )?;

        let stats = store.stats()?;
        assert_eq!(stats.total_records, 2);
        assert!(stats.tables.iter().any(|t| t.table == "app_usage" && t.rows == 2));
        assert_eq!(stats.sources.len(), 1);
        assert_eq!(stats.sources[0].runs, 2);
        assert_eq!(stats.sources[0].failed_runs, 1);
        assert!(stats.sources[0].last_successful_completion.is_some());
        Ok(())
    }

    // Test IDs: TSTORE-008
    #[test]
    fn legacy_unversioned_database_is_adopted_and_upgraded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("unified.db");
        {
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "CREATE TABLE extraction_runs (
                   id INTEGER PRIMARY KEY AUTOINCREMENT,
                   started_at INTEGER NOT NULL,
                   completed_at INTEGER,
                   source TEXT NOT NULL,
                   records_added INTEGER DEFAULT 0,
                   records_skipped INTEGER DEFAULT 0,
                   status TEXT DEFAULT 'running'
                 );
                 INSERT INTO extraction_runs (started_at, completed_at, source, status)
                 VALUES (1, 2, 'chrome', 'completed');",
            )?;
        }

        let mut store = SqliteStore::open(&path)?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 1);
        assert!(before.inferred_from_legacy);
        assert_eq!(before.pending_versions, vec![2]);

        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, 2);
        assert!(!after.inferred_from_legacy);
        assert!(table_exists(&store.conn, "contacts")?);
        assert_eq!(store.last_successful_completion("chrome")?, Some(2));
        Ok(())
    }

    // Test IDs: TSTORE-009
    #[test]
    fn backup_copies_stored_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = migrated_store()?;
        let _ = store.insert(&app_usage("a", "com.apple.Safari"))?;

        let backup = dir.path().join("nested").join("backup.db");
        store.backup_database(&backup)?;

        let restored = SqliteStore::open(&backup)?;
        assert_eq!(restored.count(RecordKind::AppUsage)?, 1);
        Ok(())
    }

    // Test IDs: TSTORE-010
    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = migrated_store()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert_eq!(report.schema_status.current_version, 2);
        Ok(())
    }
}
