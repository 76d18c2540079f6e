use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use footprint_core::{daily_connected_time, overlong_events, MAX_EVENT_SECONDS};
use footprint_ingest::config::ConfigFile;
use footprint_ingest::{CollectorRegistry, IngestConfig, Pipeline};
use footprint_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "footprint.cli.v1";
const DEFAULT_RUNS_LIMIT: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "footprint")]
#[command(about = "Ingest local activity databases into one unified SQLite store")]
struct Cli {
    #[arg(long, global = true, default_value = "./footprint.sqlite3")]
    db: PathBuf,

    /// Working directory for source snapshots
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    /// YAML file overriding source locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract the named sources, or every registered source
    Extract(ExtractArgs),
    /// Show where each source resolves
    Sources,
    /// List extraction runs, newest first
    Runs(RunsArgs),
    /// Row counts and per-source run activity
    Stats,
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Args)]
struct ExtractArgs {
    sources: Vec<String>,
}

#[derive(Debug, Args)]
struct RunsArgs {
    #[arg(long)]
    source: Option<String>,
    #[arg(long, default_value_t = DEFAULT_RUNS_LIMIT)]
    limit: usize,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Connected time per bluetooth device per day
    Bluetooth(BluetoothArgs),
}

#[derive(Debug, Args)]
struct BluetoothArgs {
    /// Split days at UTC midnight instead of local midnight
    #[arg(long, default_value_t = false)]
    utc: bool,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Serialize)]
struct SourceLocation {
    source: &'static str,
    candidates: Vec<PathBuf>,
    discover: bool,
    resolved: Option<PathBuf>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = IngestConfig::macos_defaults(std::env::temp_dir().join("footprint-snapshots"));
    if let Some(path) = &cli.config {
        config.apply(ConfigFile::from_path(path)?);
    }
    if let Some(dir) = &cli.snapshot_dir {
        config.snapshot_dir.clone_from(dir);
    }
    Ok(config)
}

fn open_store(cli: &Cli) -> Result<SqliteStore> {
    tracing::debug!(db = %cli.db.display(), "opening unified store");
    SqliteStore::open(&cli.db)
}

fn open_migrated(cli: &Cli) -> Result<SqliteStore> {
    let mut store = open_store(cli)?;
    store.migrate()?;
    Ok(store)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let registry = CollectorRegistry::standard();

    match &cli.command {
        Command::Extract(args) => {
            let config = load_config(&cli)?;
            let store = open_migrated(&cli)?;
            run_extract(args, &config, &registry, &store)
        }
        Command::Sources => run_sources(&load_config(&cli)?, &registry),
        Command::Runs(args) => run_runs(args, &open_migrated(&cli)?),
        Command::Stats => {
            let stats = open_migrated(&cli)?.stats()?;
            emit_json(serde_json::to_value(&stats).context("failed to serialize store stats")?)
        }
        Command::Report { command } => match command {
            ReportCommand::Bluetooth(args) => run_report_bluetooth(args, &open_migrated(&cli)?),
        },
        Command::Db { command } => {
            let mut store = open_store(&cli)?;
            run_db(command, &mut store)
        }
    }
}

fn run_extract(
    args: &ExtractArgs,
    config: &IngestConfig,
    registry: &CollectorRegistry,
    store: &SqliteStore,
) -> Result<()> {
    let pipeline = Pipeline::new(config, registry, store);
    let batch = if args.sources.is_empty() {
        pipeline.run_all()
    } else {
        pipeline.run_batch(&args.sources)
    };

    emit_json(serde_json::json!({
        "sources": batch.sources,
        "totals": batch.totals(),
        "failed": batch.failed(),
        "abandoned_runs_closed": batch.abandoned_runs_closed
    }))?;

    if batch.all_succeeded() {
        Ok(())
    } else {
        Err(anyhow!("{} of {} sources failed", batch.failed(), batch.sources.len()))
    }
}

fn run_sources(config: &IngestConfig, registry: &CollectorRegistry) -> Result<()> {
    let locations = registry
        .iter()
        .map(|collector| {
            let source = config.source_or_discover(collector.name());
            SourceLocation {
                source: collector.name(),
                candidates: source.candidates.iter().map(|raw| config.expand(raw)).collect(),
                discover: source.discover,
                resolved: footprint_ingest::discovery::locate_source(
                    collector,
                    &source,
                    config.home().as_deref(),
                ),
            }
        })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "snapshot_dir": config.snapshot_dir,
        "sources": locations
    }))
}

fn run_runs(args: &RunsArgs, store: &SqliteStore) -> Result<()> {
    let runs = store.list_runs(args.source.as_deref(), args.limit)?;
    emit_json(serde_json::json!({ "runs": runs }))
}

fn run_report_bluetooth(args: &BluetoothArgs, store: &SqliteStore) -> Result<()> {
    let intervals = store.bluetooth_intervals()?;
    let skipped_events = overlong_events(&intervals);
    if skipped_events > 0 {
        tracing::warn!(
            skipped_events,
            max_seconds = MAX_EVENT_SECONDS,
            "bluetooth events longer than the cap left out of the report"
        );
    }
    let (timezone, days) = if args.utc {
        ("utc", daily_connected_time(intervals, &Utc))
    } else {
        ("local", daily_connected_time(intervals, &Local))
    };
    emit_json(serde_json::json!({
        "timezone": timezone,
        "skipped_events": skipped_events,
        "days": days
    }))
}

fn run_db(command: &DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate => run_db_migrate(store),
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
        DbCommand::Backup(args) => {
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty(),
        "inferred_from_legacy": status.inferred_from_legacy
    }))
}

fn run_db_migrate(store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}
