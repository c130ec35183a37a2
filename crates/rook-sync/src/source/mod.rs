//! Source adapters: turn a platform's API into a stream of
//! [`SourceEvent`]s for one player.
//!
//! A stream item of `Err` ends the job ([`Error::SourceUnavailable`] or
//! [`Error::Cancelled`]). Everything that only affects one page or record
//! arrives as an `Ok` event so the orchestrator can log it and move on.

pub mod archive;
pub mod stream;

use futures::stream::BoxStream;
use rook_core::{
  cursor::SyncCursor,
  game::{RawGame, SourceName},
  store::GameStore,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use self::{archive::ArchiveSource, stream::StreamSource};
use crate::{Error, Result, dedup::DedupGate};

/// What to fetch for one job.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  /// Platform username, already normalised.
  pub identity: String,
  /// Upper bound on new games yielded.
  pub limit:    usize,
  /// Games at or before this cursor are not yielded.
  pub cursor:   Option<SyncCursor>,
  pub cancel:   CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  AlreadyImported,
  BehindCursor,
}

#[derive(Debug, Clone)]
pub enum SourceEvent {
  Game(RawGame),
  Skipped {
    external_id: String,
    reason:      SkipReason,
  },
  /// A page or record that could not be understood.
  Malformed {
    reference: String,
    reason:    String,
  },
  /// A page that could not be fetched even after retries.
  Unreachable {
    reference: String,
    error:     String,
  },
}

pub type EventStream<'a> = BoxStream<'a, Result<SourceEvent>>;

/// A platform the importer can pull a player's games from.
pub trait GameSource: Send + Sync {
  fn name(&self) -> SourceName;

  /// Stream the player's games newest first, skipping anything the cursor
  /// covers or `dedup` reports as stored, and stopping after
  /// `request.limit` new games.
  fn fetch_games<'a, S: GameStore>(
    &'a self,
    request: FetchRequest,
    dedup: &'a DedupGate<S>,
  ) -> EventStream<'a>;
}

/// `base` with `segments` appended, each percent-encoded as a single path
/// segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<String> {
  let mut url = reqwest::Url::parse(base)
    .map_err(|e| Error::InvalidRequest(format!("bad base url {base:?}: {e}")))?;
  url
    .path_segments_mut()
    .map_err(|()| Error::InvalidRequest(format!("base url {base:?} cannot take a path")))?
    .pop_if_empty()
    .extend(segments);
  Ok(url.to_string())
}

/// Lift a failure of a job-critical request to a job-level error.
fn unavailable(platform: SourceName, err: Error) -> Error {
  match err {
    Error::Cancelled => Error::Cancelled,
    other => Error::SourceUnavailable {
      platform,
      message: other.to_string(),
    },
  }
}
