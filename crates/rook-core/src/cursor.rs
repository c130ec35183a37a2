//! Sync cursors — the persisted resume point per `(source, identity)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::SourceName;

/// Resume point for incremental import of one player's games from one
/// source.
///
/// `last_imported_at` never decreases across updates for the same key and
/// `total_imported` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
  pub source:           SourceName,
  pub identity:         String,
  /// Unix seconds of the newest successfully written game.
  pub last_imported_at: i64,
  pub last_external_id: Option<String>,
  pub total_imported:   u64,
  pub updated_at:       DateTime<Utc>,
}

impl SyncCursor {
  /// `true` if a game that occurred at `occurred_at` is already behind this
  /// cursor and should not be fetched again.
  pub fn covers(&self, occurred_at: i64) -> bool {
    occurred_at <= self.last_imported_at
  }
}

/// A request to move a cursor forward after a batch of writes committed.
#[derive(Debug, Clone)]
pub struct CursorUpdate {
  pub source:       SourceName,
  pub identity:     String,
  pub occurred_at:  i64,
  pub external_id:  Option<String>,
  pub increment_by: u64,
}

/// Outcome of [`crate::store::GameStore::advance_cursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorAdvance {
  /// The stored timestamp moved forward (or stayed equal).
  Advanced(SyncCursor),
  /// The requested timestamp was older than the stored one. The counter was
  /// still incremented; timestamp and external id were left untouched.
  Regressed(SyncCursor),
}

impl CursorAdvance {
  pub fn cursor(&self) -> &SyncCursor {
    match self {
      Self::Advanced(c) | Self::Regressed(c) => c,
    }
  }
}
