//! Games as they travel through the import pipeline.
//!
//! A [`RawGame`] is the normalised, in-memory shape every source adapter and
//! the PGN parser produce. It is transient: the store persists a narrower
//! projection of it (see [`crate::store::NewGame`]).

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ─── Source ──────────────────────────────────────────────────────────────────

/// The external platform (or upload path) a game came from.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceName {
  /// Archive-paginated REST API: monthly archive listing, then one page per
  /// month.
  ChessCom,
  /// Streaming-record API: one NDJSON response bounded by `max`.
  Lichess,
  /// User-supplied PGN text.
  Upload,
}

impl SourceName {
  /// Parse a source name as it appears in URLs and on the command line.
  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s.trim()).map_err(|_| Error::UnknownSource(s.to_string()))
  }
}

// ─── Result ──────────────────────────────────────────────────────────────────

/// Outcome of a game from the subject player's perspective.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GameResult {
  Win,
  Loss,
  Draw,
  Unknown,
}

impl GameResult {
  /// Interpret a PGN `Result` tag (`1-0`, `0-1`, `1/2-1/2`, `*`) for the
  /// player on the given side.
  pub fn from_pgn_tag(tag: &str, subject_is_white: bool) -> Self {
    match (tag.trim(), subject_is_white) {
      ("1-0", true) | ("0-1", false) => Self::Win,
      ("0-1", true) | ("1-0", false) => Self::Loss,
      ("1/2-1/2", _) | ("½-½", _) => Self::Draw,
      _ => Self::Unknown,
    }
  }
}

// ─── RawGame ─────────────────────────────────────────────────────────────────

/// One fetched or parsed game, prior to persistence.
///
/// `external_id` identifies the game within `source` and is never reused or
/// mutated; `(source, external_id)` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGame {
  pub external_id:  String,
  pub source:       SourceName,
  pub pgn:          String,
  pub played_on:    NaiveDate,
  pub result:       GameResult,
  /// The subject player's rating at the time of the game.
  pub rating:       i32,
  pub time_control: String,
  pub opening:      Option<String>,
  /// Unix seconds; used for ordering and cursor comparison.
  pub occurred_at:  i64,
}

// ─── Player identity ─────────────────────────────────────────────────────────

/// Derive the stable player key for a `(source, username)` pair.
///
/// Usernames are case-insensitive on both platforms, so the name is
/// lower-cased before hashing.
pub fn player_hash(source: SourceName, username: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(source.as_ref().as_bytes());
  hasher.update(b":");
  hasher.update(username.trim().to_lowercase().as_bytes());
  hex::encode(hasher.finalize())
}
