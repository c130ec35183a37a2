//! rook server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered under
//! `ROOK_`-prefixed environment variables, opens the SQLite store, and either
//! serves the import API over HTTP or runs a single command in the
//! foreground.
//!
//! ```text
//! rook serve
//! rook import --source lichess --identity alice --limit 50
//! rook import-pgn --identity alice games.pgn
//! rook reset-cursor --source chess_com --identity alice
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rook_core::game::SourceName;
use rook_store_sqlite::SqliteStore;
use rook_sync::{
  ImportEvent, ImportOrchestrator, ImportRequest, ImportSummary, JobRegistry, LimiterRegistry,
  ProgressReporter, ReqwestTransport, Retention, SyncConfig,
};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type Orchestrator = ImportOrchestrator<SqliteStore, ReqwestTransport>;

#[derive(Parser)]
#[command(author, version, about = "rook game import server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP import API (the default).
  Serve,
  /// Import a player's recent games from a remote source and print the
  /// summary as JSON.
  Import {
    /// `chess_com` or `lichess`.
    #[arg(long)]
    source:   String,
    #[arg(long)]
    identity: String,
    #[arg(long, default_value_t = 100)]
    limit:    usize,
  },
  /// Import every game in a PGN file.
  ImportPgn {
    #[arg(long)]
    identity: String,
    file:     PathBuf,
  },
  /// Delete a sync cursor so the next import starts from the newest games.
  ResetCursor {
    #[arg(long)]
    source:   String,
    #[arg(long)]
    identity: String,
  },
}

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
  #[serde(default = "default_host")]
  host:       String,
  #[serde(default = "default_port")]
  port:       u16,
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  sync:       SyncConfig,
  #[serde(default)]
  jobs:       JobsConfig,
}

/// Retention of finished jobs in the in-memory registry.
#[derive(Debug, Clone, Deserialize)]
struct JobsConfig {
  #[serde(default = "default_retention_secs")]
  retention_secs: i64,
  #[serde(default = "default_max_finished")]
  max_finished:   usize,
}

impl Default for JobsConfig {
  fn default() -> Self {
    Self {
      retention_secs: default_retention_secs(),
      max_finished:   default_max_finished(),
    }
  }
}

impl JobsConfig {
  fn retention(&self) -> Retention {
    Retention {
      max_age:      chrono::Duration::seconds(self.retention_secs),
      max_finished: self.max_finished,
    }
  }
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8088 }
fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/rook/rook.db") }
fn default_retention_secs() -> i64 { 3600 }
fn default_max_finished() -> usize { 256 }

fn load_config(path: PathBuf) -> anyhow::Result<ServerConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("ROOK")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg.sync.validate()?;
  Ok(server_cfg)
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = load_config(cli.config)?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  // Open SQLite store.
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let transport = ReqwestTransport::new(&server_cfg.sync.user_agent)
    .context("failed to build HTTP client")?;
  let limiters = LimiterRegistry::from_config(&server_cfg.sync);
  let orchestrator = Arc::new(ImportOrchestrator::new(
    Arc::clone(&store),
    transport,
    &server_cfg.sync,
    &limiters,
  ));

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(&server_cfg, orchestrator).await,
    Command::Import {
      source,
      identity,
      limit,
    } => {
      let source = SourceName::parse(&source)?;
      let request = ImportRequest {
        source,
        identity,
        limit,
      };
      let summary = run_in_foreground(|progress, cancel| async move {
        orchestrator.run(request, &progress, &cancel).await
      })
      .await?;
      print_summary(&summary)
    }
    Command::ImportPgn { identity, file } => {
      let text = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("failed to read {file:?}"))?;
      let summary = run_in_foreground(|progress, cancel| async move {
        orchestrator
          .import_pgn(&identity, &text, &progress, &cancel)
          .await
      })
      .await?;
      print_summary(&summary)
    }
    Command::ResetCursor { source, identity } => {
      let source = SourceName::parse(&source)?;
      let identity = rook_sync::orchestrator::normalize_identity(&identity)?;
      if orchestrator.cursors().reset(source, &identity).await? {
        println!("cursor for {source}/{identity} deleted");
      } else {
        println!("no cursor for {source}/{identity}");
      }
      Ok(())
    }
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn serve(server_cfg: &ServerConfig, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
  tokio::spawn(log_high_risk(orchestrator.events().subscribe()));

  let jobs = JobRegistry::new(orchestrator).with_retention(server_cfg.jobs.retention());
  let app = rook_api::api_router(jobs);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

  Ok(())
}

/// Run one job in the current task; Ctrl-C cancels it at the next batch
/// boundary.
async fn run_in_foreground<F, Fut>(job: F) -> anyhow::Result<ImportSummary>
where
  F: FnOnce(ProgressReporter, CancellationToken) -> Fut,
  Fut: Future<Output = rook_sync::Result<ImportSummary>>,
{
  let cancel = CancellationToken::new();
  let watcher = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupted; finishing the current batch");
        cancel.cancel();
      }
    })
  };

  let result = job(ProgressReporter::new(), cancel).await;
  watcher.abort();
  Ok(result?)
}

fn print_summary(summary: &ImportSummary) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(summary).context("failed to encode summary")?;
  println!("{json}");
  Ok(())
}

/// Surface high-risk games in the server log until the bus closes.
async fn log_high_risk(mut events: broadcast::Receiver<ImportEvent>) {
  loop {
    match events.recv().await {
      Ok(ImportEvent::HighRiskGame {
        source,
        identity,
        external_id,
        game_id,
        suspicion_level,
      }) => {
        tracing::warn!(
          %source,
          %identity,
          %external_id,
          game_id,
          suspicion_level,
          "high-risk game imported"
        );
      }
      Ok(ImportEvent::JobFinished { .. }) => {}
      Err(broadcast::error::RecvError::Lagged(missed)) => {
        tracing::warn!(missed, "high-risk listener fell behind");
      }
      Err(broadcast::error::RecvError::Closed) => break,
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
