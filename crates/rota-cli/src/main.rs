//! Rota CLI - Inspect and merge shared schedule snapshots
//!
//! Works directly against the shared folder, so history can be inspected
//! and merges resolved even when the scheduling app is closed.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use rota_core::merge::{
    apply_resolutions, coarse_diff, detect_conflicts, Candidate, ResolutionSet,
};
use rota_core::models::{ConflictKey, FileVersionInfo, MergeConflict, Resolution, Snapshot};
use rota_core::util::{format_timestamp_ms, normalize_actor, unix_timestamp_ms};
use rota_core::{RowSet, SnapshotStore, TableRegistry};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "rota")]
#[command(about = "Inspect and merge shared schedule snapshots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the shared snapshot folder
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Actor label recorded on anything this invocation writes
    #[arg(long, value_name = "EMAIL")]
    actor: Option<String>,

    /// Path to a table registry file (JSON)
    #[arg(long, value_name = "PATH")]
    tables: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshot versions, newest first
    History {
        /// Number of versions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one snapshot's metadata and row counts
    Show {
        /// Snapshot filename
        filename: String,
        /// Dump the full row payload as JSON instead
        #[arg(long)]
        rows: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize how snapshots newer than a base differ from it
    Check {
        /// Base snapshot filename
        base: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conflicts between a base snapshot and everything newer
    Conflicts {
        /// Base snapshot filename
        base: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge everything newer than a base and write the result
    Merge {
        /// Base snapshot filename
        base: String,
        /// Resolve every conflict by keeping the base version
        #[arg(long, conflicts_with_all = ["keep_actor", "resolutions"])]
        keep_base: bool,
        /// Resolve conflicts by keeping one actor's version
        #[arg(long, value_name = "EMAIL", conflicts_with = "resolutions")]
        keep_actor: Option<String>,
        /// JSON file mapping conflict keys to resolutions
        #[arg(long, value_name = "PATH")]
        resolutions: Option<PathBuf>,
    },
    /// Re-publish a historical snapshot as the newest version
    Restore {
        /// Snapshot filename
        filename: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] rota_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No shared folder configured. Pass --dir or set ROTA_SYNC_DIR.")]
    SyncDirNotConfigured,
    #[error("No actor configured. Pass --actor or set ROTA_ACTOR.")]
    ActorNotConfigured,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rota=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::History { limit, json }) => {
            run_history(&open_store(cli.dir)?, limit, json).await?;
        }
        Some(Commands::Show {
            filename,
            rows,
            json,
        }) => {
            run_show(&open_store(cli.dir)?, &filename, rows, json).await?;
        }
        Some(Commands::Check { base, json }) => {
            run_check(&open_store(cli.dir)?, &base, json).await?;
        }
        Some(Commands::Conflicts { base, json }) => {
            let registry = load_registry(cli.tables.as_deref())?;
            run_conflicts(&open_store(cli.dir)?, &registry, &base, json).await?;
        }
        Some(Commands::Merge {
            base,
            keep_base,
            keep_actor,
            resolutions,
        }) => {
            let store = open_store(cli.dir)?;
            let registry = load_registry(cli.tables.as_deref())?;
            let actor = resolve_actor(cli.actor)?;
            let choices = MergeChoices {
                keep_base,
                keep_actor,
                resolutions_path: resolutions,
            };
            run_merge(&store, &registry, &base, &actor, &choices).await?;
        }
        Some(Commands::Restore { filename }) => {
            let store = open_store(cli.dir)?;
            let actor = resolve_actor(cli.actor)?;
            run_restore(&store, &filename, &actor).await?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct HistoryItem {
    filename: String,
    saved_by: String,
    saved_at: i64,
    saved: String,
    relative_time: String,
    session_started_at: i64,
    size_bytes: u64,
}

async fn run_history(store: &SnapshotStore, limit: usize, as_json: bool) -> Result<(), CliError> {
    let versions = list_history(store, limit).await?;

    if as_json {
        let items = versions
            .iter()
            .map(version_to_history_item)
            .collect::<Vec<HistoryItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_history_lines(&versions) {
            println!("{line}");
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct TableCounts {
    rows: usize,
    live: usize,
}

#[derive(Debug, Serialize)]
struct ShowReport {
    filename: String,
    format: u32,
    saved_by: String,
    saved_at: i64,
    saved: String,
    session_started_at: i64,
    tables: BTreeMap<String, TableCounts>,
}

async fn run_show(
    store: &SnapshotStore,
    filename: &str,
    dump_rows: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let snapshot = store.read(filename).await?;

    if dump_rows {
        println!("{}", serde_json::to_string_pretty(&snapshot.rows)?);
        return Ok(());
    }

    let report = snapshot_to_show_report(filename, &snapshot);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.filename);
        println!("  saved by  {}", report.saved_by);
        println!("  saved at  {}", report.saved);
        println!("  session   {}", format_timestamp_ms(report.session_started_at));
        println!("  format    {}", report.format);
        for (table, counts) in &report.tables {
            println!("  {table}  {} rows, {} live", counts.rows, counts.live);
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckItem {
    filename: String,
    saved_by: String,
    saved_at: i64,
    tables: BTreeMap<String, usize>,
    total: usize,
}

async fn run_check(store: &SnapshotStore, base_name: &str, as_json: bool) -> Result<(), CliError> {
    let items = collect_check_items(store, base_name).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("Up to date: nothing newer than {base_name}");
    } else {
        for item in &items {
            println!(
                "{}  {}  {} differing rows",
                item.filename, item.saved_by, item.total
            );
            for (table, count) in &item.tables {
                println!("  {table}: {count}");
            }
        }
    }

    Ok(())
}

async fn run_conflicts(
    store: &SnapshotStore,
    registry: &TableRegistry,
    base_name: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let (base, candidates) = load_merge_inputs(store, base_name).await?;
    let conflicts = detect_conflicts(&base.rows, &candidates, registry);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
    } else if conflicts.is_empty() {
        println!("No conflicts among snapshots newer than {base_name}");
    } else {
        for line in format_conflict_lines(&conflicts) {
            println!("{line}");
        }
    }

    Ok(())
}

/// How `rota merge` resolves conflicts, from the command-line flags
struct MergeChoices {
    keep_base: bool,
    keep_actor: Option<String>,
    resolutions_path: Option<PathBuf>,
}

async fn run_merge(
    store: &SnapshotStore,
    registry: &TableRegistry,
    base_name: &str,
    actor: &str,
    choices: &MergeChoices,
) -> Result<(), CliError> {
    let (base, candidates) = load_merge_inputs(store, base_name).await?;
    if candidates.is_empty() {
        println!("Nothing newer than {base_name}; nothing to merge");
        return Ok(());
    }

    let conflicts = detect_conflicts(&base.rows, &candidates, registry);
    let mut resolutions = ResolutionSet::new(conflicts);
    apply_choices(&mut resolutions, choices)?;
    let resolved = resolutions.into_resolved()?;

    let now = unix_timestamp_ms();
    let merged = apply_resolutions(&base.rows, &candidates, &resolved, actor, now);
    let info = store.write(&merged, actor, now).await?;
    println!("{}", info.filename);
    Ok(())
}

fn apply_choices(resolutions: &mut ResolutionSet, choices: &MergeChoices) -> Result<(), CliError> {
    if choices.keep_base {
        resolutions.keep_all_base();
    } else if let Some(actor) = &choices.keep_actor {
        resolutions.keep_all_from(actor);
    } else if let Some(path) = &choices.resolutions_path {
        let raw = std::fs::read_to_string(path)?;
        let file_choices: BTreeMap<String, Resolution> = serde_json::from_str(&raw)?;
        for (key, resolution) in file_choices {
            resolutions.resolve(&ConflictKey::from(key), resolution)?;
        }
    }
    Ok(())
}

async fn run_restore(
    store: &SnapshotStore,
    filename: &str,
    actor: &str,
) -> Result<(), CliError> {
    let snapshot = store.read(filename).await?;
    let info = store
        .write(&snapshot.rows, actor, unix_timestamp_ms())
        .await?;
    println!("{}", info.filename);
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "rota", buffer);
}

async fn list_history(
    store: &SnapshotStore,
    limit: usize,
) -> Result<Vec<FileVersionInfo>, CliError> {
    let mut versions = store.list_versions().await?;
    versions.truncate(limit);
    Ok(versions)
}

async fn collect_check_items(
    store: &SnapshotStore,
    base_name: &str,
) -> Result<Vec<CheckItem>, CliError> {
    let base = store.read(base_name).await?;
    let base_info = store.version_info(base_name).await?;

    let mut items = Vec::new();
    for (info, rows) in read_newer(store, &base_info).await? {
        let diff = coarse_diff(&base.rows, &rows);
        items.push(CheckItem {
            filename: info.filename,
            saved_by: info.saved_by,
            saved_at: info.saved_at,
            total: diff.total(),
            tables: diff.tables,
        });
    }
    Ok(items)
}

async fn load_merge_inputs(
    store: &SnapshotStore,
    base_name: &str,
) -> Result<(Snapshot, Vec<Candidate>), CliError> {
    let base = store.read(base_name).await?;
    let base_info = store.version_info(base_name).await?;
    let candidates = read_newer(store, &base_info)
        .await?
        .into_iter()
        .map(|(info, rows)| Candidate::new(info.saved_by, rows))
        .collect();
    Ok((base, candidates))
}

/// Read every snapshot newer than `base`, newest first.
///
/// Unreadable files are skipped with a warning, matching how sessions
/// treat them: one corrupt snapshot cannot block the folder.
async fn read_newer(
    store: &SnapshotStore,
    base: &FileVersionInfo,
) -> Result<Vec<(FileVersionInfo, RowSet)>, CliError> {
    let mut newer = Vec::new();
    for info in store.list_versions().await? {
        if !info.is_newer_than(base) {
            continue;
        }
        match store.read(&info.filename).await {
            Ok(snapshot) => newer.push((info, snapshot.rows)),
            Err(error) => {
                tracing::warn!(filename = %info.filename, %error, "skipping unreadable snapshot");
            }
        }
    }
    Ok(newer)
}

fn snapshot_to_show_report(filename: &str, snapshot: &Snapshot) -> ShowReport {
    let mut tables = BTreeMap::new();
    for table in snapshot.rows.table_names() {
        tables.insert(
            table.to_string(),
            TableCounts {
                rows: snapshot.rows.rows(table).count(),
                live: snapshot.rows.live_rows(table).count(),
            },
        );
    }

    ShowReport {
        filename: filename.to_string(),
        format: snapshot.meta.format,
        saved_by: snapshot.meta.saved_by.clone(),
        saved_at: snapshot.meta.saved_at,
        saved: format_timestamp_ms(snapshot.meta.saved_at),
        session_started_at: snapshot.meta.session_started_at,
        tables,
    }
}

fn version_to_history_item(info: &FileVersionInfo) -> HistoryItem {
    let now_ms = Utc::now().timestamp_millis();
    HistoryItem {
        filename: info.filename.clone(),
        saved_by: info.saved_by.clone(),
        saved_at: info.saved_at,
        saved: format_timestamp_ms(info.saved_at),
        relative_time: format_relative_time(info.saved_at, now_ms),
        session_started_at: info.session_started_at,
        size_bytes: info.size_bytes,
    }
}

fn format_history_lines(versions: &[FileVersionInfo]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    versions
        .iter()
        .map(|info| {
            let relative_time = format_relative_time(info.saved_at, now_ms);
            format!(
                "{:<57}  {:<24}  {:<19}  {relative_time}",
                info.filename,
                info.saved_by,
                format_timestamp_ms(info.saved_at),
            )
        })
        .collect()
}

fn format_conflict_lines(conflicts: &[MergeConflict]) -> Vec<String> {
    let mut lines = Vec::new();
    for conflict in conflicts {
        lines.push(format!(
            "{}  {}",
            conflict.key.as_str(),
            conflict.row_description
        ));
        if conflict.base_row.is_some() {
            lines.push("  base: present".to_string());
        } else {
            lines.push("  base: absent".to_string());
        }
        for (index, modifier) in conflict.modifiers.iter().enumerate() {
            let change = if modifier.row.is_some() {
                "edited"
            } else {
                "deleted"
            };
            lines.push(format!("  [{index}] {}: {change}", modifier.actor));
        }
    }
    lines
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn open_store(dir_flag: Option<PathBuf>) -> Result<SnapshotStore, CliError> {
    Ok(SnapshotStore::new(resolve_sync_dir(dir_flag)?))
}

fn resolve_sync_dir(flag: Option<PathBuf>) -> Result<PathBuf, CliError> {
    flag.or_else(|| env::var_os("ROTA_SYNC_DIR").map(PathBuf::from))
        .ok_or(CliError::SyncDirNotConfigured)
}

fn resolve_actor(flag: Option<String>) -> Result<String, CliError> {
    flag.or_else(|| env::var("ROTA_ACTOR").ok())
        .as_deref()
        .and_then(normalize_actor)
        .ok_or(CliError::ActorNotConfigured)
}

fn resolve_tables_path(flag: Option<&Path>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| env::var_os("ROTA_TABLES").map(PathBuf::from))
}

fn load_registry(flag: Option<&Path>) -> Result<TableRegistry, CliError> {
    let Some(path) = resolve_tables_path(flag) else {
        return Ok(TableRegistry::new());
    };
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
