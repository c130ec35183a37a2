//! [`SyncCursorStore`] — reads and monotonic advances of sync cursors.

use std::sync::Arc;

use rook_core::{
  cursor::{CursorAdvance, CursorUpdate, SyncCursor},
  game::SourceName,
  store::GameStore,
};

use crate::{Error, Result};

pub struct SyncCursorStore<S> {
  store: Arc<S>,
}

impl<S> Clone for SyncCursorStore<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: GameStore> SyncCursorStore<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub async fn get(&self, source: SourceName, identity: &str) -> Result<Option<SyncCursor>> {
    self
      .store
      .get_cursor(source, identity.to_string())
      .await
      .map_err(Error::store)
  }

  /// Record `increment_by` newly written games, the newest of which occurred
  /// at `occurred_at`. The stored timestamp never moves backwards; a
  /// regression still counts the games and is reported to the caller.
  pub async fn advance(
    &self,
    source: SourceName,
    identity: &str,
    occurred_at: i64,
    external_id: Option<String>,
    increment_by: u64,
  ) -> Result<CursorAdvance> {
    let advance = self
      .store
      .advance_cursor(CursorUpdate {
        source,
        identity: identity.to_string(),
        occurred_at,
        external_id,
        increment_by,
      })
      .await
      .map_err(Error::store)?;

    match &advance {
      CursorAdvance::Advanced(c) => tracing::debug!(
        %source,
        identity,
        last_imported_at = c.last_imported_at,
        total_imported = c.total_imported,
        "cursor advanced"
      ),
      CursorAdvance::Regressed(c) => tracing::warn!(
        %source,
        identity,
        stored = c.last_imported_at,
        requested = occurred_at,
        "cursor timestamp regression ignored"
      ),
    }
    Ok(advance)
  }

  pub async fn reset(&self, source: SourceName, identity: &str) -> Result<bool> {
    let deleted = self
      .store
      .reset_cursor(source, identity.to_string())
      .await
      .map_err(Error::store)?;
    if deleted {
      tracing::info!(%source, identity, "cursor reset");
    }
    Ok(deleted)
  }
}
