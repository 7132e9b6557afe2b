//! revgate: model-assisted review suggestions and merge gating.
//!
//! Every subcommand prints JSON on stdout; logs go to stderr.
//!
//! # Exit status
//!
//! - `0` on success, and for `gate` when the merge is allowed.
//! - `1` on any error, an unsuccessful analysis, an unhealthy model endpoint,
//!   or a denied merge.
//! - `2` when `set-status` names a suggestion that does not exist.

mod event;
mod git;
mod signal;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use revgate_core::analysis::Analyzer;
use revgate_core::config::Settings;
use revgate_core::db::SuggestionStore;
use revgate_core::error::StoreError;
use revgate_core::gate::MergeGate;
use revgate_core::llm::{ChatModel, HttpChatClient};
use revgate_core::trigger::ReanalysisTrigger;
use revgate_core::types::{AnalysisOptions, AnalysisRequest, FileDiff, ResolutionStatus, Scope};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::git::GitDiffSource;

#[derive(Parser, Debug)]
#[command(name = "revgate", about = "Model-assisted code review suggestions and merge gating", version)]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/revgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database holding the suggestions
    #[arg(long, global = true, env = "REVGATE_DB", default_value = ".revgate/suggestions.db")]
    db: PathBuf,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse a change request and store the suggestions
    Analyze(AnalyzeArgs),
    /// List stored suggestions
    List(ListArgs),
    /// Resolve one suggestion as ACCEPTED, REJECTED or DISMISSED
    SetStatus(SetStatusArgs),
    /// Aggregate counts for a change request
    Stats(ScopeArgs),
    /// Delete every suggestion of a change request
    Clear(ScopeArgs),
    /// Merge check; exits 1 when the merge is denied
    Gate(ScopeArgs),
    /// Probe the model endpoint
    Health,
    /// Analyse change requests in the background as lifecycle events arrive on stdin
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, Copy)]
struct ScopeArgs {
    /// Change request id
    #[arg(long = "pr")]
    change_request_id: i64,
    #[arg(long)]
    repo_id: i64,
}

impl ScopeArgs {
    fn scope(self) -> Scope {
        Scope::new(self.change_request_id, self.repo_id)
    }
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    #[arg(long, default_value = "")]
    project: String,
    #[arg(long, default_value = "")]
    slug: String,
    /// Local repository to diff
    #[arg(long, default_value = ".")]
    repo: PathBuf,
    /// Source branch head
    #[arg(long, requires = "to", conflicts_with = "diffs")]
    from: Option<String>,
    /// Target branch
    #[arg(long, requires = "from")]
    to: Option<String>,
    /// JSON file holding an array of file diffs
    #[arg(long)]
    diffs: Option<PathBuf>,
    /// Override the configured minimum confidence
    #[arg(long)]
    min_confidence: Option<f64>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Only suggestions for this file, in line order
    #[arg(long)]
    file: Option<String>,
}

#[derive(Args, Debug)]
struct SetStatusArgs {
    id: String,
    /// ACCEPTED, REJECTED or DISMISSED (any case)
    status: String,
    /// Who resolved it
    #[arg(long = "by")]
    resolved_by: String,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Local repository the change requests live in
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

/// Returns the path to the revgate config file.
///
/// Prefers `$XDG_CONFIG_HOME/revgate/config.toml`; falls back to
/// `~/.config/revgate/config.toml` when the env var is absent.
fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("revgate").join("config.toml")
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialising output")?;
    println!("{out}");
    Ok(())
}

async fn open_store(path: &Path) -> Result<SuggestionStore> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let path = path.to_string_lossy();
    SuggestionStore::open(&path).await.with_context(|| format!("opening database {path}"))
}

fn chat_model(settings: &Settings) -> Result<Arc<dyn ChatModel>> {
    let client = HttpChatClient::new(settings.llm.clone()).context("building model client")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_file = cli.config.clone().unwrap_or_else(config_path);
    let settings = Settings::load(&config_file)
        .with_context(|| format!("loading settings from {}", config_file.display()))?;

    match cli.command {
        Commands::Analyze(args) => analyze(&settings, &cli.db, args).await,
        Commands::List(args) => {
            let store = open_store(&cli.db).await?;
            let scope = args.scope.scope();
            match args.file {
                Some(file) => print_json(&store.list_for_file(scope, &file).await?)?,
                None => {
                    let suggestions = store.list(scope).await?;
                    let stats = store.stats(scope).await?;
                    print_json(&serde_json::json!({ "suggestions": suggestions, "stats": stats }))?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::SetStatus(args) => set_status(&cli.db, args).await,
        Commands::Stats(args) => {
            let store = open_store(&cli.db).await?;
            print_json(&store.stats(args.scope()).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clear(args) => {
            let store = open_store(&cli.db).await?;
            let deleted = store.delete_all(args.scope()).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gate(args) => {
            let store = open_store(&cli.db).await?;
            let decision = MergeGate::from_settings(&settings.merge_check)
                .check(&store, args.scope())
                .await?;
            print_json(&decision)?;
            Ok(if decision.is_allowed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Health => {
            let model = chat_model(&settings)?;
            let healthy = model.health_check().await;
            print_json(&serde_json::json!({ "endpoint": settings.llm.endpoint, "healthy": healthy }))?;
            Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Serve(args) => serve(&settings, &cli.db, args).await,
    }
}

async fn analyze(settings: &Settings, db: &Path, args: AnalyzeArgs) -> Result<ExitCode> {
    let file_diffs: Vec<FileDiff> = match (&args.diffs, &args.from, &args.to) {
        (Some(path), _, _) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        (None, Some(from), Some(to)) => {
            let source = GitDiffSource::new(
                &args.repo,
                settings.analysis.include_full_content,
                settings.analysis.max_file_size_bytes(),
            );
            let (from, to) = (from.clone(), to.clone());
            tokio::task::spawn_blocking(move || source.diff_refs(&from, &to))
                .await
                .context("diff task panicked")??
        }
        _ => bail!("either --diffs or both --from and --to are required"),
    };

    let request = AnalysisRequest {
        change_request_id: args.scope.change_request_id,
        repository_id: args.scope.repo_id,
        project_key: args.project,
        repo_slug: args.slug,
        file_diffs,
        options: AnalysisOptions { min_confidence: args.min_confidence, ..AnalysisOptions::default() },
    };

    let store = open_store(db).await?;
    let analyzer = Analyzer::new(chat_model(settings)?, &settings.analysis);
    let response = analyzer.analyze_and_save(&store, &request).await?;
    print_json(&response)?;
    Ok(if response.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn set_status(db: &Path, args: SetStatusArgs) -> Result<ExitCode> {
    let status: ResolutionStatus = args.status.parse()?;
    if args.resolved_by.trim().is_empty() {
        bail!("--by must not be empty");
    }

    let store = open_store(db).await?;
    match store.update_status(&args.id, status, args.resolved_by.trim()).await {
        Ok(suggestion) => {
            print_json(&suggestion)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(StoreError::NotFound(id)) => {
            eprintln!("revgate: no suggestion with id {id}");
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}

/// Event loop for `serve`: exits on stdin EOF or SIGTERM, then drains the pool.
async fn serve(settings: &Settings, db: &Path, args: ServeArgs) -> Result<ExitCode> {
    let term_flag = signal::register_sigterm();

    let store = open_store(db).await?;
    let analyzer = Analyzer::new(chat_model(settings)?, &settings.analysis);
    let diffs = Arc::new(GitDiffSource::new(
        &args.repo,
        settings.analysis.include_full_content,
        settings.analysis.max_file_size_bytes(),
    ));
    let trigger = ReanalysisTrigger::start(
        tokio::runtime::Handle::current(),
        settings.analysis.workers,
        settings.analysis.auto_enabled,
        analyzer,
        store,
        diffs,
    )
    .context("starting analysis workers")?;
    let mut events = event::spawn_reader(std::io::BufReader::new(std::io::stdin()))
        .context("starting event reader")?;
    info!(workers = settings.analysis.workers, repo = %args.repo.display(), "serving lifecycle events");

    'event_loop: loop {
        tokio::select! {
            // Heartbeat so SIGTERM is noticed even when stdin is idle.
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                if term_flag.load(Ordering::Relaxed) {
                    info!("SIGTERM received");
                    break 'event_loop;
                }
            }
            next = events.recv() => {
                match next {
                    Some(event) => {
                        trigger.submit(event);
                    }
                    None => break 'event_loop,
                }
                if term_flag.load(Ordering::Relaxed) {
                    break 'event_loop;
                }
            }
        }
    }

    // The reader thread may still be parked in a stdin read; it is detached and
    // does not keep the process alive.
    drop(events);
    tokio::task::spawn_blocking(move || trigger.shutdown())
        .await
        .context("waiting for analysis workers")?;
    Ok(ExitCode::SUCCESS)
}
