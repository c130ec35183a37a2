//! Sliding-window rate limiter shared by every job that talks to the same
//! external platform.
//!
//! Each identifier keeps a history of request timestamps (pruned to the last
//! hour) and, optionally, a byte counter for volume-limited platforms.
//! [`RateLimiter::check_limit`] is a pure query; [`RateLimiter::wait_for_slot`]
//! checks and reserves under one lock, so concurrent callers can never both
//! take the last slot of a window.

use std::{
  collections::{HashMap, VecDeque},
  fmt,
  sync::Arc,
  time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use rook_core::game::SourceName;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// How much request history is retained per identifier.
const HISTORY_MS: u64 = HOUR_MS;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Request-count ceilings plus an optional byte quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
  pub per_second: u32,
  #[serde(default)]
  pub per_minute: Option<u32>,
  #[serde(default)]
  pub per_hour:   Option<u32>,
  #[serde(default)]
  pub data_quota: Option<DataQuota>,
}

/// At most `bytes` of response body per `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQuota {
  pub bytes:       u64,
  pub interval_ms: u64,
}

impl RateLimitConfig {
  /// A zero ceiling or an empty quota would never let a request through.
  pub fn validate(&self) -> Result<(), String> {
    for (limit, _, why) in self.ceilings() {
      if limit == 0 {
        return Err(format!("{why:?} ceiling must be at least 1"));
      }
    }
    if let Some(quota) = self.data_quota
      && (quota.bytes == 0 || quota.interval_ms == 0)
    {
      return Err("data quota needs non-zero bytes and interval".to_string());
    }
    Ok(())
  }

  fn ceilings(&self) -> impl Iterator<Item = (u32, u64, LimitReason)> + '_ {
    [
      Some((self.per_second, SECOND_MS, LimitReason::PerSecond)),
      self.per_minute.map(|n| (n, MINUTE_MS, LimitReason::PerMinute)),
      self.per_hour.map(|n| (n, HOUR_MS, LimitReason::PerHour)),
    ]
    .into_iter()
    .flatten()
  }
}

// ─── Decisions and records ───────────────────────────────────────────────────

/// Which ceiling denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
  PerSecond,
  PerMinute,
  PerHour,
  DataQuota,
}

impl fmt::Display for LimitReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::PerSecond => "per-second limit reached",
      Self::PerMinute => "per-minute limit reached",
      Self::PerHour => "per-hour limit reached",
      Self::DataQuota => "data quota exhausted",
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitDecision {
  pub allowed:     bool,
  /// Zero when allowed; otherwise the wait until every violated window has
  /// room again.
  pub retry_after: Duration,
  /// Requests left in the tightest window.
  pub remaining:   u32,
  /// Unix milliseconds at which the current window state next changes.
  pub reset_at_ms: u64,
  pub reason:      Option<LimitReason>,
}

/// What happened on one completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
  /// The slot timestamp returned by [`RateLimiter::wait_for_slot`], or the
  /// call start for requests made without a reservation.
  pub timestamp_ms:        u64,
  pub response_size_bytes: u64,
  pub duration_ms:         u64,
  pub success:             bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
  at_ms:   u64,
  /// Reserved by `try_acquire_at` and not yet recorded.
  pending: bool,
}

#[derive(Debug, Default)]
struct Window {
  entries:         VecDeque<Entry>,
  quota_used:      u64,
  quota_resets_at: u64,
}

impl Window {
  fn prune(&mut self, now: u64) {
    let horizon = now.saturating_sub(HISTORY_MS);
    while self.entries.front().is_some_and(|e| e.at_ms < horizon) {
      self.entries.pop_front();
    }
  }
}

pub(crate) fn now_ms() -> u64 { u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0) }

// ─── Limiter ─────────────────────────────────────────────────────────────────

/// A sliding-window limiter for one platform. Share it through an [`Arc`].
#[derive(Debug)]
pub struct RateLimiter {
  config:  RateLimitConfig,
  windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
  pub fn new(config: RateLimitConfig) -> Self {
    Self {
      config,
      windows: Mutex::new(HashMap::new()),
    }
  }

  /// Would a request for `identifier` be allowed right now?
  pub fn check_limit(&self, identifier: &str) -> LimitDecision {
    self.check_limit_at(identifier, now_ms())
  }

  pub fn check_limit_at(&self, identifier: &str, now: u64) -> LimitDecision {
    let mut windows = self.windows.lock();
    let window = windows.entry(identifier.to_string()).or_default();
    window.prune(now);
    self.evaluate(window, now)
  }

  /// Check and, if allowed, reserve a slot at `now`. The returned timestamp
  /// identifies the reservation for [`Self::record_request`].
  pub fn try_acquire_at(&self, identifier: &str, now: u64) -> Result<u64, LimitDecision> {
    let mut windows = self.windows.lock();
    let window = windows.entry(identifier.to_string()).or_default();
    window.prune(now);

    let decision = self.evaluate(window, now);
    if !decision.allowed {
      return Err(decision);
    }
    window.entries.push_back(Entry {
      at_ms:   now,
      pending: true,
    });
    Ok(now)
  }

  /// Wait until a request for `identifier` is allowed and reserve it.
  pub async fn wait_for_slot(&self, identifier: &str) -> u64 {
    loop {
      match self.try_acquire_at(identifier, now_ms()) {
        Ok(at) => return at,
        Err(decision) => {
          tracing::debug!(
            identifier,
            reason = ?decision.reason,
            retry_after_ms = decision.retry_after.as_millis() as u64,
            "rate limited; waiting"
          );
          tokio::time::sleep(decision.retry_after).await;
        }
      }
    }
  }

  /// Record a completed call. Fills in the matching reservation if there is
  /// one, otherwise appends a new history entry; response bytes count
  /// against the data quota either way.
  pub fn record_request(&self, identifier: &str, record: RequestRecord) {
    let mut windows = self.windows.lock();
    let window = windows.entry(identifier.to_string()).or_default();

    let reserved = window
      .entries
      .iter_mut()
      .find(|e| e.pending && e.at_ms == record.timestamp_ms);
    match reserved {
      Some(entry) => entry.pending = false,
      None => {
        let at = window
          .entries
          .iter()
          .position(|e| e.at_ms > record.timestamp_ms)
          .unwrap_or(window.entries.len());
        window.entries.insert(at, Entry {
          at_ms:   record.timestamp_ms,
          pending: false,
        });
      }
    }

    if let Some(quota) = self.config.data_quota {
      let now = now_ms().max(record.timestamp_ms);
      if now >= window.quota_resets_at {
        window.quota_used = 0;
        window.quota_resets_at = now + quota.interval_ms;
      }
      window.quota_used = window.quota_used.saturating_add(record.response_size_bytes);
    }

    if !record.success {
      tracing::trace!(identifier, duration_ms = record.duration_ms, "failed request recorded");
    }
  }

  /// Bytes counted against the quota in the current quota interval.
  pub fn quota_used(&self, identifier: &str) -> u64 {
    self
      .windows
      .lock()
      .get(identifier)
      .map_or(0, |w| w.quota_used)
  }

  fn evaluate(&self, window: &mut Window, now: u64) -> LimitDecision {
    if let Some(quota) = self.config.data_quota
      && now >= window.quota_resets_at
    {
      window.quota_used = 0;
      window.quota_resets_at = now + quota.interval_ms;
    }

    let mut retry_ms = 0;
    let mut reason = None;
    let mut remaining = u32::MAX;
    let mut reset_at = now;

    for (limit, span, why) in self.config.ceilings() {
      let mut in_window: Vec<u64> = window
        .entries
        .iter()
        .map(|e| e.at_ms)
        .filter(|at| at + span > now)
        .collect();
      in_window.sort_unstable();

      let count = u32::try_from(in_window.len()).unwrap_or(u32::MAX);
      remaining = remaining.min(limit.saturating_sub(count));

      if count >= limit {
        // The oldest `count - limit + 1` in-window requests must age out
        // before one more fits.
        // A zero ceiling has nothing to age out and blocks a whole window.
        let idx = (count - limit) as usize;
        let wait = in_window.get(idx).map_or(span, |at| at + span - now);
        if wait > retry_ms {
          retry_ms = wait;
          reason = Some(why);
        }
      } else if why == LimitReason::PerSecond
        && let Some(oldest) = in_window.first()
      {
        reset_at = oldest + span;
      }
    }

    if let Some(quota) = self.config.data_quota {
      if window.quota_used >= quota.bytes {
        let wait = window.quota_resets_at.saturating_sub(now).max(1);
        if wait > retry_ms {
          retry_ms = wait;
          reason = Some(LimitReason::DataQuota);
        }
      } else {
        reset_at = reset_at.max(window.quota_resets_at);
      }
    }

    match reason {
      Some(reason) => LimitDecision {
        allowed:     false,
        retry_after: Duration::from_millis(retry_ms),
        remaining:   0,
        reset_at_ms: now + retry_ms,
        reason:      Some(reason),
      },
      None => LimitDecision {
        allowed: true,
        retry_after: Duration::ZERO,
        remaining,
        reset_at_ms: reset_at,
        reason: None,
      },
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// One limiter per platform, shared by every job in the process.
#[derive(Debug, Clone)]
pub struct LimiterRegistry {
  chess_com: Arc<RateLimiter>,
  lichess:   Arc<RateLimiter>,
}

impl LimiterRegistry {
  pub fn from_config(config: &SyncConfig) -> Self {
    Self {
      chess_com: Arc::new(RateLimiter::new(config.chess_com.limits.clone())),
      lichess:   Arc::new(RateLimiter::new(config.lichess.limits.clone())),
    }
  }

  /// The limiter for a remote source, or `None` for sources that make no
  /// requests.
  pub fn get(&self, source: SourceName) -> Option<&Arc<RateLimiter>> {
    match source {
      SourceName::ChessCom => Some(&self.chess_com),
      SourceName::Lichess => Some(&self.lichess),
      SourceName::Upload => None,
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn limiter(per_second: u32) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
      per_second,
      per_minute: None,
      per_hour: None,
      data_quota: None,
    })
  }

  #[test]
  fn request_over_per_second_ceiling_is_denied_then_allowed() {
    let l = limiter(3);
    for t in 0..3 {
      assert!(l.try_acquire_at("k", 10_000 + t).is_ok());
    }

    let denied = l.check_limit_at("k", 10_500);
    assert!(!denied.allowed);
    assert_eq!(denied.reason, Some(LimitReason::PerSecond));
    assert_eq!(denied.retry_after, Duration::from_millis(500));
    assert_eq!(denied.remaining, 0);

    let later = 10_500 + denied.retry_after.as_millis() as u64;
    let allowed = l.check_limit_at("k", later);
    assert!(allowed.allowed);
    assert_eq!(allowed.remaining, 1);
  }

  #[test]
  fn check_does_not_reserve() {
    let l = limiter(1);
    assert!(l.check_limit_at("k", 0).allowed);
    assert!(l.check_limit_at("k", 0).allowed);
    assert!(l.try_acquire_at("k", 0).is_ok());
    assert!(l.try_acquire_at("k", 1).is_err());
  }

  #[test]
  fn identifiers_are_independent() {
    let l = limiter(1);
    assert!(l.try_acquire_at("a", 0).is_ok());
    assert!(l.try_acquire_at("b", 0).is_ok());
    assert!(l.try_acquire_at("a", 1).is_err());
  }

  #[test]
  fn retry_after_is_the_longest_violated_window() {
    let l = RateLimiter::new(RateLimitConfig {
      per_second: 10,
      per_minute: Some(2),
      per_hour: None,
      data_quota: None,
    });
    assert!(l.try_acquire_at("k", 0).is_ok());
    assert!(l.try_acquire_at("k", 2_000).is_ok());

    let d = l.check_limit_at("k", 3_000);
    assert!(!d.allowed);
    assert_eq!(d.reason, Some(LimitReason::PerMinute));
    assert_eq!(d.retry_after, Duration::from_millis(57_000));
  }

  #[test]
  fn byte_quota_blocks_until_interval_resets() {
    let l = RateLimiter::new(RateLimitConfig {
      per_second: 100,
      per_minute: None,
      per_hour: None,
      data_quota: Some(DataQuota {
        bytes:       1_000,
        interval_ms: 60_000,
      }),
    });
    let now = now_ms();
    let at = l.try_acquire_at("k", now).unwrap();
    l.record_request("k", RequestRecord {
      timestamp_ms:        at,
      response_size_bytes: 1_500,
      duration_ms:         20,
      success:             true,
    });
    assert_eq!(l.quota_used("k"), 1_500);

    let d = l.check_limit_at("k", now + 10);
    assert!(!d.allowed);
    assert_eq!(d.reason, Some(LimitReason::DataQuota));
    assert!(d.retry_after > Duration::ZERO);
    assert!(d.retry_after <= Duration::from_millis(60_000));
  }

  #[test]
  fn history_older_than_an_hour_is_pruned() {
    let l = RateLimiter::new(RateLimitConfig {
      per_second: 100,
      per_minute: None,
      per_hour: Some(1),
      data_quota: None,
    });
    assert!(l.try_acquire_at("k", 0).is_ok());
    assert!(l.try_acquire_at("k", HOUR_MS - 1).is_err());
    assert!(l.try_acquire_at("k", HOUR_MS).is_ok());
  }

  #[tokio::test]
  async fn wait_for_slot_sleeps_until_allowed() {
    let l = limiter(2);
    let start = std::time::Instant::now();
    for _ in 0..3 {
      l.wait_for_slot("k").await;
    }
    assert!(start.elapsed() >= Duration::from_millis(900));
  }

  #[test]
  fn zero_ceiling_denies_for_a_whole_window() {
    let l = RateLimiter::new(RateLimitConfig {
      per_second: 5,
      per_minute: Some(0),
      per_hour:   None,
      data_quota: None,
    });
    let d = l.check_limit_at("k", 1_000);
    assert!(!d.allowed);
    assert_eq!(d.reason, Some(LimitReason::PerMinute));
    assert_eq!(d.retry_after, Duration::from_millis(MINUTE_MS));
  }

  #[test]
  fn validate_rejects_zero_ceilings_and_empty_quotas() {
    let ok = RateLimitConfig {
      per_second: 5,
      per_minute: Some(100),
      per_hour:   None,
      data_quota: None,
    };
    assert!(ok.validate().is_ok());

    let zero_second = RateLimitConfig {
      per_second: 0,
      ..ok.clone()
    };
    assert!(zero_second.validate().is_err());

    let zero_minute = RateLimitConfig {
      per_minute: Some(0),
      ..ok.clone()
    };
    assert!(zero_minute.validate().unwrap_err().contains("PerMinute"));

    let empty_quota = RateLimitConfig {
      data_quota: Some(DataQuota {
        bytes:       0,
        interval_ms: 60_000,
      }),
      ..ok
    };
    assert!(empty_quota.validate().is_err());
  }
}
