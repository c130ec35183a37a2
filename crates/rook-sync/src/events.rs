//! Events published by the importer for other components (notifications,
//! dashboards) to consume. Delivery is best effort: with no subscribers, or
//! a lagging one, events are dropped rather than slowing the import.

use rook_core::game::SourceName;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::progress::Phase;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportEvent {
  /// A newly scored game met the configured suspicion threshold.
  HighRiskGame {
    source:          SourceName,
    identity:        String,
    external_id:     String,
    game_id:         i64,
    suspicion_level: f64,
  },
  JobFinished {
    job_id:         Uuid,
    source:         SourceName,
    identity:       String,
    phase:          Phase,
    imported_count: usize,
  },
}

pub const DEFAULT_CAPACITY: usize = 256;

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<ImportEvent>,
}

impl Default for EventBus {
  fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> { self.tx.subscribe() }

  pub fn emit(&self, event: ImportEvent) {
    // `send` only fails when nobody is listening.
    let _ = self.tx.send(event);
  }
}
