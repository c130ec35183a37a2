//! [`ImportOrchestrator`] — drives one import job through fetch, dedup,
//! batched writes and the cursor advance.
//!
//! Failures are isolated to the smallest unit they affect. A bad record or
//! page, or a failed write, becomes an [`ImportIssue`] in the summary and
//! the job carries on. Only an unreachable source (before any game was
//! read) or a cursor lookup failure aborts the whole job.

use std::{fmt, sync::Arc, time::Duration};

use futures::StreamExt as _;
use rook_core::{
  cursor::{CursorAdvance, SyncCursor},
  game::{RawGame, SourceName, player_hash},
  score::{GameScorer, HeuristicScorer},
  store::{GameInsert, GameStore, NewGame, NewPlayer},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  config::{SourceConfig, SyncConfig},
  cursor::SyncCursorStore,
  dedup::DedupGate,
  events::{EventBus, ImportEvent},
  fetch::Fetcher,
  limiter::{LimiterRegistry, RateLimiter},
  progress::{Phase, ProgressReporter},
  source::{ArchiveSource, FetchRequest, GameSource as _, SourceEvent, StreamSource},
  transport::{HttpTransport, ReqwestTransport},
  upload,
};

// ─── Requests and summaries ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
  pub source:   SourceName,
  pub identity: String,
  /// Upper bound on new games fetched.
  pub limit:    usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  /// A page or call failed after retries.
  TransientNetwork,
  /// A page, record or PGN block could not be understood.
  MalformedRecord,
  /// A player, game, score or cursor write failed.
  Persistence,
  /// The cursor advance asked for an older timestamp than the stored one.
  CursorRegression,
}

/// One per-record problem. Never fatal to the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportIssue {
  pub kind:        IssueKind,
  /// Game id, page URL or block reference the issue concerns.
  pub external_id: Option<String>,
  pub message:     String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
  /// Games whose game and score rows were both written.
  pub imported_count: usize,
  /// Games already stored, already covered by the cursor, or listed twice.
  pub skipped_count:  usize,
  /// Records received from the source, including skipped and malformed ones.
  pub total_fetched:  usize,
  pub errors:         Vec<ImportIssue>,
  pub cancelled:      bool,
  /// The cursor after the job; `None` if the player has never been synced.
  pub cursor:         Option<SyncCursor>,
}

impl ImportSummary {
  /// The terminal phase this summary corresponds to.
  pub fn phase(&self) -> Phase {
    if self.cancelled {
      Phase::Cancelled
    } else if self.errors.is_empty() {
      Phase::Done
    } else {
      Phase::PartialFailure
    }
  }
}

/// Pacing and scoring knobs for the write phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteSettings {
  pub batch_size:          usize,
  pub inter_game_delay:    Duration,
  pub inter_batch_delay:   Duration,
  pub high_risk_threshold: f64,
}

impl WriteSettings {
  pub fn from_config(config: &SyncConfig) -> Self {
    Self {
      batch_size:          config.batch_size(),
      inter_game_delay:    Duration::from_millis(config.inter_game_delay_ms),
      inter_batch_delay:   Duration::from_millis(config.inter_batch_delay_ms),
      high_risk_threshold: config.high_risk_threshold,
    }
  }
}

/// Lower-cased, trimmed platform username.
pub fn normalize_identity(identity: &str) -> Result<String> {
  let identity = identity.trim().to_lowercase();
  if identity.is_empty() {
    return Err(Error::InvalidRequest("identity is empty".to_string()));
  }
  Ok(identity)
}

// ─── Per-job state ───────────────────────────────────────────────────────────

struct WrittenGame {
  occurred_at: i64,
  external_id: String,
  rating:      i32,
}

struct JobRun {
  source:    SourceName,
  identity:  String,
  player_id: Option<i64>,
  written:   Vec<WrittenGame>,
  summary:   ImportSummary,
}

impl JobRun {
  fn new(source: SourceName, identity: String, cursor: Option<SyncCursor>) -> Self {
    Self {
      source,
      identity,
      player_id: None,
      written: Vec::new(),
      summary: ImportSummary {
        cursor,
        ..ImportSummary::default()
      },
    }
  }

  fn issue(&mut self, kind: IssueKind, external_id: Option<String>, message: String) {
    tracing::warn!(
      source = %self.source,
      identity = %self.identity,
      ?kind,
      external_id = external_id.as_deref().unwrap_or("-"),
      %message,
      "import issue"
    );
    self.summary.errors.push(ImportIssue {
      kind,
      external_id,
      message,
    });
  }
}

fn persistence_issue(external_id: &str, what: &str, err: impl fmt::Display) -> ImportIssue {
  ImportIssue {
    kind:        IssueKind::Persistence,
    external_id: Some(external_id.to_string()),
    message:     format!("{what}: {err}"),
  }
}

async fn pause(delay: Duration) {
  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct ImportOrchestrator<S, T = ReqwestTransport> {
  store:     Arc<S>,
  cursors:   SyncCursorStore<S>,
  chess_com: ArchiveSource<T>,
  lichess:   StreamSource<T>,
  scorer:    Arc<dyn GameScorer>,
  settings:  WriteSettings,
  events:    EventBus,
}

impl<S, T> ImportOrchestrator<S, T>
where
  S: GameStore,
  T: HttpTransport + Clone,
{
  pub fn new(store: Arc<S>, transport: T, config: &SyncConfig, limiters: &LimiterRegistry) -> Self {
    let fetcher = |source: SourceName, source_config: &SourceConfig| {
      let limiter = limiters
        .get(source)
        .map_or_else(|| Arc::new(RateLimiter::new(source_config.limits.clone())), Arc::clone);
      Fetcher::new(
        transport.clone(),
        limiter,
        source_config.limiter_key(source),
        config.retry,
        config.request_timeout(),
      )
    };

    Self {
      cursors:   SyncCursorStore::new(Arc::clone(&store)),
      chess_com: ArchiveSource::new(
        fetcher(SourceName::ChessCom, &config.chess_com),
        config.chess_com.base_url.clone(),
      ),
      lichess:   StreamSource::new(
        fetcher(SourceName::Lichess, &config.lichess),
        config.lichess.base_url.clone(),
      ),
      store,
      scorer:    Arc::new(HeuristicScorer),
      settings:  WriteSettings::from_config(config),
      events:    EventBus::default(),
    }
  }

  pub fn with_scorer(mut self, scorer: Arc<dyn GameScorer>) -> Self {
    self.scorer = scorer;
    self
  }

  pub fn events(&self) -> &EventBus { &self.events }

  pub fn cursors(&self) -> &SyncCursorStore<S> { &self.cursors }

  // ── Entry points ──────────────────────────────────────────────────────

  /// Fetch and import up to `request.limit` new games from a remote source.
  pub async fn run(
    &self,
    request: ImportRequest,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
  ) -> Result<ImportSummary> {
    let source = request.source;
    let identity = normalize_identity(&request.identity)?;
    if source == SourceName::Upload {
      return Err(Error::NotFetchable(source));
    }
    tracing::info!(%source, %identity, limit = request.limit, "import started");

    progress.enter(Phase::Fetching, Some(request.limit));
    let cursor = self.cursors.get(source, &identity).await?;
    let gate = DedupGate::new(Arc::clone(&self.store));
    let mut job = JobRun::new(source, identity.clone(), cursor.clone());

    let fetch = FetchRequest {
      identity,
      limit: request.limit,
      cursor,
      cancel: cancel.clone(),
    };
    let mut events = match source {
      SourceName::ChessCom => self.chess_com.fetch_games(fetch, &gate),
      _ => self.lichess.fetch_games(fetch, &gate),
    };

    let mut fetched = Vec::new();
    while let Some(item) = events.next().await {
      match item {
        Ok(SourceEvent::Game(game)) => {
          job.summary.total_fetched += 1;
          fetched.push(game);
          progress.advance_to(fetched.len());
        }
        Ok(SourceEvent::Skipped {
          external_id,
          reason,
        }) => {
          tracing::debug!(%external_id, ?reason, "skipped");
          job.summary.total_fetched += 1;
          job.summary.skipped_count += 1;
        }
        Ok(SourceEvent::Malformed { reference, reason }) => {
          job.summary.total_fetched += 1;
          job.issue(IssueKind::MalformedRecord, Some(reference), reason);
        }
        Ok(SourceEvent::Unreachable { reference, error }) => {
          job.issue(IssueKind::TransientNetwork, Some(reference), error);
        }
        Err(Error::Cancelled) => {
          job.summary.cancelled = true;
          break;
        }
        Err(e) => {
          tracing::error!(%source, identity = %job.identity, error = %e, "import failed");
          return Err(e);
        }
      }
    }
    drop(events);

    self.persist(&mut job, fetched, &gate, progress, cancel).await;
    Ok(finish(job))
  }

  /// Import every game in an uploaded PGN blob for `identity`. Blocks that
  /// fail to parse are reported as malformed records.
  pub async fn import_pgn(
    &self,
    identity: &str,
    text: &str,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
  ) -> Result<ImportSummary> {
    let source = SourceName::Upload;
    let identity = normalize_identity(identity)?;
    tracing::info!(%identity, bytes = text.len(), "pgn import started");

    progress.enter(Phase::Fetching, None);
    let cursor = self.cursors.get(source, &identity).await?;
    let mut job = JobRun::new(source, identity, cursor);

    let outcome = rook_pgn::parse_many(text);
    job.summary.total_fetched = outcome.games.len() + outcome.rejections.len();
    for rejection in outcome.rejections {
      job.issue(
        IssueKind::MalformedRecord,
        Some(format!("block {}", rejection.block)),
        rejection.reason.to_string(),
      );
    }

    let mut games: Vec<RawGame> = outcome
      .games
      .iter()
      .map(|g| upload::to_raw_game(&job.identity, g))
      .collect();
    games.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

    let gate = DedupGate::new(Arc::clone(&self.store));
    self.persist(&mut job, games, &gate, progress, cancel).await;
    Ok(finish(job))
  }

  // ── Phases ────────────────────────────────────────────────────────────

  /// Deduplicating, Writing and Advancing.
  async fn persist(
    &self,
    job: &mut JobRun,
    games: Vec<RawGame>,
    gate: &DedupGate<S>,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
  ) {
    progress.enter(Phase::Deduplicating, Some(games.len()));
    let mut fresh = Vec::with_capacity(games.len());
    for (i, game) in games.into_iter().enumerate() {
      if gate.exists(job.source, &game.external_id).await {
        tracing::debug!(external_id = %game.external_id, "duplicate; skipped");
        job.summary.skipped_count += 1;
      } else {
        gate.claim(job.source, &game.external_id);
        fresh.push(game);
      }
      progress.advance_to(i + 1);
    }

    if !job.summary.cancelled {
      self.write_batches(job, fresh, progress, cancel).await;
    }

    progress.enter(Phase::Advancing, None);
    self.advance(job).await;
  }

  async fn write_batches(
    &self,
    job: &mut JobRun,
    games: Vec<RawGame>,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
  ) {
    progress.enter(Phase::Writing, Some(games.len()));
    let mut done = 0;

    for (b, batch) in games.chunks(self.settings.batch_size.max(1)).enumerate() {
      // Cancellation is honoured between batches; a started batch finishes.
      if cancel.is_cancelled() {
        tracing::info!(identity = %job.identity, written = done, "import cancelled");
        job.summary.cancelled = true;
        break;
      }
      if b > 0 {
        pause(self.settings.inter_batch_delay).await;
      }

      for (g, game) in batch.iter().enumerate() {
        if g > 0 {
          pause(self.settings.inter_game_delay).await;
        }
        match self.write_game(job, game).await {
          Ok(true) => {
            job.summary.imported_count += 1;
            job.written.push(WrittenGame {
              occurred_at: game.occurred_at,
              external_id: game.external_id.clone(),
              rating:      game.rating,
            });
          }
          Ok(false) => job.summary.skipped_count += 1,
          Err(issue) => job.issue(issue.kind, issue.external_id, issue.message),
        }
        done += 1;
        progress.advance_to(done);
      }
    }
  }

  /// Write the game and its score. `Ok(false)` means the store already had
  /// the game.
  async fn write_game(&self, job: &mut JobRun, game: &RawGame) -> Result<bool, ImportIssue> {
    let player_id = match job.player_id {
      Some(id) => id,
      None => {
        let id = self
          .ensure_player(job.source, &job.identity, game.rating)
          .await
          .map_err(|e| persistence_issue(&game.external_id, "player write failed", e))?;
        job.player_id = Some(id);
        id
      }
    };

    let insert = self
      .store
      .create_game(NewGame {
        player_id,
        source: game.source,
        external_id: game.external_id.clone(),
        played_on: game.played_on,
        result: game.result,
        rating: game.rating,
        time_control: game.time_control.clone(),
        opening: game.opening.clone(),
        occurred_at: game.occurred_at,
        pgn: game.pgn.clone(),
      })
      .await
      .map_err(|e| persistence_issue(&game.external_id, "game write failed", e))?;
    let GameInsert::Created(game_id) = insert else {
      tracing::debug!(external_id = %game.external_id, "stored concurrently; skipped");
      return Ok(false);
    };

    let metrics = self.scorer.score_game(game);
    let suspicion_level = metrics.suspicion_level;
    // The game row stays even if this fails; it just doesn't count.
    self
      .store
      .create_score(game_id, metrics)
      .await
      .map_err(|e| persistence_issue(&game.external_id, "score write failed", e))?;

    if suspicion_level >= self.settings.high_risk_threshold {
      tracing::info!(external_id = %game.external_id, suspicion_level, "high-risk game");
      self.events.emit(ImportEvent::HighRiskGame {
        source: job.source,
        identity: job.identity.clone(),
        external_id: game.external_id.clone(),
        game_id,
        suspicion_level,
      });
    }
    Ok(true)
  }

  async fn ensure_player(
    &self,
    source: SourceName,
    identity: &str,
    rating: i32,
  ) -> Result<i64, S::Error> {
    let hash = player_hash(source, identity);
    if let Some(id) = self.store.player_id(hash.clone()).await? {
      return Ok(id);
    }
    self
      .store
      .create_player(NewPlayer {
        hash,
        source,
        username: identity.to_string(),
        rating,
      })
      .await
  }

  /// Refresh the player's rating and move the cursor to the newest written
  /// game. Runs after cancellation too.
  async fn advance(&self, job: &mut JobRun) {
    let Some(newest) = job.written.iter().max_by_key(|w| w.occurred_at) else {
      return;
    };
    let (occurred_at, external_id, rating) =
      (newest.occurred_at, newest.external_id.clone(), newest.rating);

    if let Some(player_id) = job.player_id
      && let Err(e) = self.store.update_player_rating(player_id, rating).await
    {
      tracing::warn!(player_id, error = %e, "rating refresh failed");
    }

    let count = job.written.len() as u64;
    match self
      .cursors
      .advance(job.source, &job.identity, occurred_at, Some(external_id), count)
      .await
    {
      Ok(advance) => {
        let cursor = advance.cursor().clone();
        if let CursorAdvance::Regressed(_) = advance {
          let message = format!(
            "newest written game at {occurred_at} is older than cursor at {}",
            cursor.last_imported_at
          );
          job.issue(IssueKind::CursorRegression, None, message);
        }
        job.summary.cursor = Some(cursor);
      }
      Err(e) => job.issue(
        IssueKind::Persistence,
        None,
        format!("cursor advance failed: {e}"),
      ),
    }
  }
}

fn finish(job: JobRun) -> ImportSummary {
  let summary = job.summary;
  tracing::info!(
    source = %job.source,
    identity = %job.identity,
    imported = summary.imported_count,
    skipped = summary.skipped_count,
    fetched = summary.total_fetched,
    errors = summary.errors.len(),
    cancelled = summary.cancelled,
    "import finished"
  );
  summary
}

// ─── Tests ───────────────────────────────────────────────────────────────────
