//! Job phases and the shared progress record a running job updates.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Where an import job is in its lifecycle.
///
/// `Idle → Fetching → Deduplicating → Writing → Advancing`, then exactly one
/// terminal phase. `Cancelled` still passes through `Advancing` so games
/// written before the cancellation move the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Idle,
  Fetching,
  Deduplicating,
  Writing,
  Advancing,
  Done,
  PartialFailure,
  Failed,
  Cancelled,
}

impl Phase {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Self::Done | Self::PartialFailure | Self::Failed | Self::Cancelled
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
  pub phase:   Phase,
  /// Items handled so far in the current phase.
  pub current: usize,
  /// Items expected in the current phase, when known.
  pub total:   Option<usize>,
}

/// Shared, cheaply cloneable progress cell. The job writes, observers read
/// snapshots.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
  inner: Arc<Mutex<JobProgress>>,
}

impl Default for ProgressReporter {
  fn default() -> Self {
    Self {
      inner: Arc::new(Mutex::new(JobProgress {
        phase:   Phase::Idle,
        current: 0,
        total:   None,
      })),
    }
  }
}

impl ProgressReporter {
  pub fn new() -> Self { Self::default() }

  /// Enter `phase`, resetting the counters.
  pub fn enter(&self, phase: Phase, total: Option<usize>) {
    let mut p = self.inner.lock();
    if p.phase.is_terminal() {
      return;
    }
    *p = JobProgress {
      phase,
      current: 0,
      total,
    };
  }

  pub fn advance_to(&self, current: usize) { self.inner.lock().current = current; }

  pub fn snapshot(&self) -> JobProgress { *self.inner.lock() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_phase_is_sticky() {
    let p = ProgressReporter::new();
    p.enter(Phase::Writing, Some(4));
    p.advance_to(2);
    assert_eq!(p.snapshot().current, 2);

    p.enter(Phase::Cancelled, None);
    p.enter(Phase::Writing, Some(1));
    assert_eq!(p.snapshot().phase, Phase::Cancelled);
  }
}
