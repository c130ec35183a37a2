//! [`SqliteStore`] — the SQLite implementation of [`GameStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use rook_core::{
  cursor::{CursorAdvance, CursorUpdate, SyncCursor},
  game::SourceName,
  score::ScoreMetrics,
  store::{GameInsert, GameStore, NewGame, NewPlayer},
};

use crate::{
  encode::{encode_date, encode_dt, encode_source, RawCursor},
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A rook game store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Current rating of a player, if it exists.
  pub async fn player_rating(&self, player_id: i64) -> Result<Option<i32>> {
    let rating = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT rating FROM players WHERE player_id = ?1",
              rusqlite::params![player_id],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(rating)
  }

  /// Number of stored games for a source.
  pub async fn game_count(&self, source: SourceName) -> Result<u64> {
    let source_str = encode_source(source);
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM games WHERE source = ?1",
          rusqlite::params![source_str],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(u64::try_from(count).unwrap_or(0))
  }

  /// The score attached to a game, if any.
  pub async fn score_for(&self, game_id: i64) -> Result<Option<ScoreMetrics>> {
    let score = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT engine_match_pct, delta_cp, run_perfect, ml_prob, suspicion_level
               FROM scores WHERE game_id = ?1",
              rusqlite::params![game_id],
              |r| {
                Ok(ScoreMetrics {
                  engine_match_pct: r.get(0)?,
                  delta_cp:         r.get(1)?,
                  run_perfect:      r.get(2)?,
                  ml_prob:          r.get(3)?,
                  suspicion_level:  r.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    Ok(score)
  }
}

// ─── GameStore impl ──────────────────────────────────────────────────────────

impl GameStore for SqliteStore {
  type Error = Error;

  // ── Players ───────────────────────────────────────────────────────────────

  async fn player_id(&self, hash: String) -> Result<Option<i64>> {
    let id = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT player_id FROM players WHERE player_hash = ?1",
              rusqlite::params![hash],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(id)
  }

  async fn create_player(&self, player: NewPlayer) -> Result<i64> {
    let now_str    = encode_dt(Utc::now());
    let source_str = encode_source(player.source);

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO players (player_hash, source, username, rating, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)
           ON CONFLICT (player_hash) DO NOTHING",
          rusqlite::params![
            player.hash,
            source_str,
            player.username,
            player.rating,
            now_str,
          ],
        )?;
        let id: i64 = conn.query_row(
          "SELECT player_id FROM players WHERE player_hash = ?1",
          rusqlite::params![player.hash],
          |r| r.get(0),
        )?;
        Ok(id)
      })
      .await?;
    Ok(id)
  }

  async fn update_player_rating(&self, player_id: i64, rating: i32) -> Result<()> {
    let now_str = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE players SET rating = ?2, updated_at = ?3 WHERE player_id = ?1",
          rusqlite::params![player_id, rating, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Games and scores ──────────────────────────────────────────────────────

  async fn game_exists(&self, source: SourceName, external_id: String) -> Result<bool> {
    let source_str = encode_source(source);
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM games WHERE source = ?1 AND external_id = ?2",
              rusqlite::params![source_str, external_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn create_game(&self, game: NewGame) -> Result<GameInsert> {
    let source_str    = encode_source(game.source);
    let played_on_str = encode_date(game.played_on);
    let result_str    = game.result.to_string();
    let imported_str  = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "INSERT INTO games (
             player_id, source, external_id, played_on, result, rating,
             time_control, opening, occurred_at, pgn, imported_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
           ON CONFLICT (source, external_id) DO NOTHING",
          rusqlite::params![
            game.player_id,
            source_str,
            game.external_id,
            played_on_str,
            result_str,
            game.rating,
            game.time_control,
            game.opening,
            game.occurred_at,
            game.pgn,
            imported_str,
          ],
        )?;
        Ok(if changed == 0 {
          GameInsert::AlreadyExists
        } else {
          GameInsert::Created(conn.last_insert_rowid())
        })
      })
      .await?;
    Ok(inserted)
  }

  async fn create_score(&self, game_id: i64, metrics: ScoreMetrics) -> Result<()> {
    let scored_str = encode_dt(Utc::now());
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO scores (
             game_id, engine_match_pct, delta_cp, run_perfect, ml_prob,
             suspicion_level, scored_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (game_id) DO NOTHING",
          rusqlite::params![
            game_id,
            metrics.engine_match_pct,
            metrics.delta_cp,
            metrics.run_perfect,
            metrics.ml_prob,
            metrics.suspicion_level,
            scored_str,
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::ScoreExists(game_id));
    }
    Ok(())
  }

  // ── Cursors ───────────────────────────────────────────────────────────────

  async fn get_cursor(&self, source: SourceName, identity: String) -> Result<Option<SyncCursor>> {
    let source_str = encode_source(source);
    let raw: Option<RawCursor> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM sync_cursors WHERE source = ?1 AND identity = ?2",
                RawCursor::COLUMNS
              ),
              rusqlite::params![source_str, identity],
              RawCursor::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCursor::into_cursor).transpose()
  }

  async fn advance_cursor(&self, update: CursorUpdate) -> Result<CursorAdvance> {
    let source_str = encode_source(update.source);
    let now_str    = encode_dt(Utc::now());
    let requested  = update.occurred_at;
    let increment  = i64::try_from(update.increment_by).unwrap_or(i64::MAX);

    // One statement: the comparison, the counter increment and the write
    // happen inside SQLite, so concurrent advances cannot interleave.
    let raw: RawCursor = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "INSERT INTO sync_cursors (
               source, identity, last_imported_at, last_external_id,
               total_imported, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source, identity) DO UPDATE SET
               total_imported   = total_imported + excluded.total_imported,
               last_external_id = CASE
                 WHEN excluded.last_imported_at >= last_imported_at
                 THEN COALESCE(excluded.last_external_id, last_external_id)
                 ELSE last_external_id
               END,
               last_imported_at = MAX(last_imported_at, excluded.last_imported_at),
               updated_at       = excluded.updated_at
             RETURNING {}",
            RawCursor::COLUMNS
          ),
          rusqlite::params![
            source_str,
            update.identity,
            requested,
            update.external_id,
            increment,
            now_str,
          ],
          RawCursor::from_row,
        )?)
      })
      .await?;

    let cursor = raw.into_cursor()?;
    if cursor.last_imported_at > requested {
      tracing::debug!(
        source = %cursor.source,
        identity = %cursor.identity,
        stored = cursor.last_imported_at,
        requested,
        "cursor advance would regress; timestamp kept"
      );
      Ok(CursorAdvance::Regressed(cursor))
    } else {
      Ok(CursorAdvance::Advanced(cursor))
    }
  }

  async fn reset_cursor(&self, source: SourceName, identity: String) -> Result<bool> {
    let source_str = encode_source(source);
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM sync_cursors WHERE source = ?1 AND identity = ?2",
          rusqlite::params![source_str, identity],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }
}
