//! [`DedupGate`] — "have we already stored this game?"
//!
//! Combines a store lookup with the set of ids already claimed by the
//! current job, so a game listed twice in one fetch is written once. The
//! store's `(source, external_id)` uniqueness constraint stays the final
//! authority; this only avoids needless writes.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use rook_core::{game::SourceName, store::GameStore};

pub struct DedupGate<S> {
  store:   Arc<S>,
  claimed: Mutex<HashSet<(SourceName, String)>>,
}

impl<S: GameStore> DedupGate<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      claimed: Mutex::new(HashSet::new()),
    }
  }

  /// `true` if the game is stored or already claimed by this job.
  ///
  /// A failed lookup answers `false`: the write that follows will hit the
  /// uniqueness constraint if the game does exist.
  pub async fn exists(&self, source: SourceName, external_id: &str) -> bool {
    let claimed = self
      .claimed
      .lock()
      .contains(&(source, external_id.to_string()));
    if claimed {
      return true;
    }
    match self.store.game_exists(source, external_id.to_string()).await {
      Ok(exists) => exists,
      Err(e) => {
        tracing::warn!(%source, external_id, error = %e, "dedup lookup failed");
        false
      }
    }
  }

  /// Claim `external_id` for this job. Returns `false` if it was already
  /// claimed.
  pub fn claim(&self, source: SourceName, external_id: &str) -> bool {
    self
      .claimed
      .lock()
      .insert((source, external_id.to_string()))
  }
}
