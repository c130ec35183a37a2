//! The `GameStore` trait — the narrow write contract the import pipeline
//! needs from persistent storage.
//!
//! The trait is implemented by storage backends (e.g. `rook-store-sqlite`).
//! The sync pipeline depends on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  cursor::{CursorAdvance, CursorUpdate, SyncCursor},
  game::{GameResult, SourceName},
  score::ScoreMetrics,
};

// ─── Input types ─────────────────────────────────────────────────────────────

/// A player row to create when none exists for the hash yet.
#[derive(Debug, Clone)]
pub struct NewPlayer {
  /// See [`crate::game::player_hash`].
  pub hash:     String,
  pub source:   SourceName,
  pub username: String,
  pub rating:   i32,
}

/// A game row; `(source, external_id)` must be unique in the store.
#[derive(Debug, Clone)]
pub struct NewGame {
  pub player_id:    i64,
  pub source:       SourceName,
  pub external_id:  String,
  pub played_on:    NaiveDate,
  pub result:       GameResult,
  pub rating:       i32,
  pub time_control: String,
  pub opening:      Option<String>,
  pub occurred_at:  i64,
  pub pgn:          String,
}

/// Outcome of [`GameStore::create_game`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameInsert {
  Created(i64),
  /// The uniqueness constraint on `(source, external_id)` rejected the row:
  /// somebody else imported it between our dedup check and the write.
  AlreadyExists,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persistent store the importer writes into.
///
/// All methods return `Send` futures so the trait can be used from tasks
/// spawned on a multi-threaded runtime.
pub trait GameStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Players ───────────────────────────────────────────────────────────

  /// Look up a player by identity hash.
  fn player_id(
    &self,
    hash: String,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + '_;

  /// Create a player, returning its id. If a concurrent writer created the
  /// same hash first, the existing id is returned.
  fn create_player(
    &self,
    player: NewPlayer,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn update_player_rating(
    &self,
    player_id: i64,
    rating: i32,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Games and scores ──────────────────────────────────────────────────

  fn game_exists(
    &self,
    source: SourceName,
    external_id: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn create_game(
    &self,
    game: NewGame,
  ) -> impl Future<Output = Result<GameInsert, Self::Error>> + Send + '_;

  /// Attach the 1:1 score row to a game.
  fn create_score(
    &self,
    game_id: i64,
    metrics: ScoreMetrics,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Cursors ───────────────────────────────────────────────────────────

  fn get_cursor(
    &self,
    source: SourceName,
    identity: String,
  ) -> impl Future<Output = Result<Option<SyncCursor>, Self::Error>> + Send + '_;

  /// Atomically upsert a cursor: increment the counter and move the
  /// timestamp forward, never backward. Must be a single storage-level
  /// operation so concurrent advances for the same key cannot lose
  /// increments.
  fn advance_cursor(
    &self,
    update: CursorUpdate,
  ) -> impl Future<Output = Result<CursorAdvance, Self::Error>> + Send + '_;

  /// Administrative reset. Returns `true` if a cursor was deleted.
  fn reset_cursor(
    &self,
    source: SourceName,
    identity: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
