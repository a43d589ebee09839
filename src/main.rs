use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use redirect_ledger::config::{
    ConfigError, ConfigSources, DEFAULT_DATABASE_FILE, EffectiveConfig, STATE_DIR,
    default_global_config_yaml, default_repo_config_yaml, load_effective_config,
};
use redirect_ledger::ingest::{IngestError, ingest_dumps};
use redirect_ledger::query::{check_integrity, history, resolve_as_of, summary};
use redirect_ledger::store::VersionedStore;
use serde_json::{Value, json};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<IngestError> for CliError {
    fn from(value: IngestError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "redirect-ledger")]
#[command(about = "Versioned redirect history from wiki dump INSERT statements")]
struct Cli {
    /// Use ~/.redirect-ledger instead of ./.redirect-ledger
    #[arg(long, global = true)]
    global: bool,
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Extra config file applied after every other layer
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the state directory, database and default config
    Init,
    /// Run the redirect pass then the page pass of one batch
    Ingest(IngestArgs),
    /// Current page and root counts with both watermarks
    Counts,
    /// Every redirect and page version stored for an id
    History(HistoryArgs),
    /// What a page resolved to as of a version
    Resolve(ResolveArgs),
    /// Delete one redirect version and the pages bound to it
    DeleteRedirect(DeleteRedirectArgs),
    /// Report orphaned pages and broken redirect chains
    Check,
    /// Most recent passes from the run ledger
    Runs(RunsArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    redirect_dump: Option<PathBuf>,
    #[arg(long)]
    page_dump: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    id: u32,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    page_id: u32,
    /// Defaults to the current page watermark
    #[arg(long)]
    as_of: Option<u32>,
}

#[derive(Args, Debug)]
struct DeleteRedirectArgs {
    source_id: u32,
    version: u32,
}

#[derive(Args, Debug)]
struct RunsArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, Clone)]
struct LedgerPaths {
    root: PathBuf,
    database: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    // Only fails when a subscriber is already installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(cli: Cli) -> Result<(), CliError> {
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let home = home_dir()?;
    let paths = ledger_paths(&cwd, &home, cli.global);
    let config = load_effective_config(
        &cwd,
        &home,
        &ConfigSources {
            user: Some(&paths.user_config),
            repo: match paths.mode {
                StorageMode::RepoLocal => Some(&paths.repo_config),
                StorageMode::Global => None,
            },
            explicit: cli.config.as_deref(),
        },
    )?;
    let database = config.database.clone().unwrap_or_else(|| paths.database.clone());

    match cli.command {
        Command::Init => cmd_init(&paths, &database),
        Command::Ingest(args) => cmd_ingest(&database, &config, args),
        Command::Counts => cmd_counts(&database),
        Command::History(args) => cmd_history(&database, args),
        Command::Resolve(args) => cmd_resolve(&database, args),
        Command::DeleteRedirect(args) => cmd_delete_redirect(&database, args),
        Command::Check => cmd_check(&database),
        Command::Runs(args) => cmd_runs(&database, args),
    }
}

fn cmd_init(paths: &LedgerPaths, database: &Path) -> Result<(), CliError> {
    fs::create_dir_all(&paths.root).map_err(|err| CliError::io("mkdir_error", err))?;
    let _ = create_store(database)?;
    write_default_config(paths)?;

    print_json(&json!({
        "status": "ok",
        "state_dir": paths.root,
        "database": database,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn cmd_ingest(database: &Path, config: &EffectiveConfig, args: IngestArgs) -> Result<(), CliError> {
    let redirect_dump = args.redirect_dump.or_else(|| config.redirect_dump.clone());
    let page_dump = args
        .page_dump
        .or_else(|| config.page_dump.clone())
        .ok_or_else(|| {
            CliError::new(
                "missing_page_dump",
                "no page dump given; pass --page-dump or set page_dump in config",
            )
        })?;

    let store = create_store(database)?;
    let report = ingest_dumps(&store, redirect_dump.as_deref(), &page_dump)?;
    let summary = summary(&store)?;
    info!(
        current_pages = summary.current_pages,
        current_roots = summary.current_roots,
        "Batch ingested"
    );

    print_json(&json!({
        "status": "ok",
        "redirect": report.redirect,
        "page": report.page,
        "summary": summary,
    }))
}

fn cmd_counts(database: &Path) -> Result<(), CliError> {
    let store = open_store(database)?;
    print_json(&serde_json::to_value(summary(&store)?)?)
}

fn cmd_history(database: &Path, args: HistoryArgs) -> Result<(), CliError> {
    let store = open_store(database)?;
    print_json(&serde_json::to_value(history(&store, args.id)?)?)
}

fn cmd_resolve(database: &Path, args: ResolveArgs) -> Result<(), CliError> {
    let store = open_store(database)?;
    print_json(&serde_json::to_value(resolve_as_of(
        &store,
        args.page_id,
        args.as_of,
    )?)?)
}

fn cmd_delete_redirect(database: &Path, args: DeleteRedirectArgs) -> Result<(), CliError> {
    let store = open_store(database)?;
    let Some(outcome) = store.delete_redirect(args.source_id, args.version)? else {
        return Err(CliError::new(
            "not_found",
            format!(
                "no redirect with source_id {} at version {}",
                args.source_id, args.version
            ),
        ));
    };
    print_json(&json!({
        "status": "ok",
        "deleted": outcome.redirect,
        "removed_pages": outcome.removed_pages,
    }))
}

fn cmd_check(database: &Path) -> Result<(), CliError> {
    let store = open_store(database)?;
    let report = check_integrity(&store)?;
    print_json(&json!({
        "clean": report.is_clean(),
        "orphaned_pages": report.orphaned_pages,
        "broken_chains": report.broken_chains,
    }))?;
    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::new(
            "integrity_violation",
            format!(
                "{} orphaned page(s), {} broken chain(s)",
                report.orphaned_pages.len(),
                report.broken_chains.len()
            ),
        ))
    }
}

fn cmd_runs(database: &Path, args: RunsArgs) -> Result<(), CliError> {
    let store = open_store(database)?;
    let runs = store.recent_runs(args.limit)?;
    print_json(&json!({
        "count": runs.len(),
        "runs": runs,
    }))
}

fn ledger_paths(cwd: &Path, home: &Path, global: bool) -> LedgerPaths {
    let (root, mode) = if global {
        (home.join(STATE_DIR), StorageMode::Global)
    } else {
        (cwd.join(STATE_DIR), StorageMode::RepoLocal)
    };

    LedgerPaths {
        database: root.join(DEFAULT_DATABASE_FILE),
        repo_config: cwd.join(STATE_DIR).join("config.yml"),
        user_config: home.join(STATE_DIR).join("config.yml"),
        root,
        mode,
    }
}

/// Opens the database, creating it and its schema when absent.
fn create_store(database: &Path) -> Result<VersionedStore, CliError> {
    if let Some(parent) = database.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    Ok(VersionedStore::open(database)?)
}

fn open_store(database: &Path) -> Result<VersionedStore, CliError> {
    if !database.exists() {
        return Err(CliError::new(
            "not_initialized",
            format!(
                "no ledger database at {}; run `redirect-ledger init`",
                database.display()
            ),
        ));
    }
    Ok(VersionedStore::open(database)?)
}

fn write_default_config(paths: &LedgerPaths) -> Result<(), CliError> {
    let config_path = match paths.mode {
        StorageMode::RepoLocal => &paths.repo_config,
        StorageMode::Global => &paths.user_config,
    };
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    let default = match paths.mode {
        StorageMode::RepoLocal => default_repo_config_yaml(),
        StorageMode::Global => default_global_config_yaml(),
    };
    fs::write(config_path, default).map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
