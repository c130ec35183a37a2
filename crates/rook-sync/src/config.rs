//! Configuration for the sync pipeline.
//!
//! Every field has a default, so an empty config file is valid. The server
//! binary layers a TOML file and `ROOK_*` environment variables on top.

use std::time::Duration;

use rook_core::game::SourceName;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  fetch::RetryPolicy,
  limiter::{DataQuota, RateLimitConfig},
};

/// Connection and rate-limit settings for one external platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
  pub base_url:    String,
  pub limits:      RateLimitConfig,
  /// Identifier the limiter tracks requests under. Jobs that share a key
  /// share a quota; defaults to the source name.
  #[serde(default)]
  pub limiter_key: Option<String>,
}

impl SourceConfig {
  pub fn limiter_key(&self, source: SourceName) -> String {
    self
      .limiter_key
      .clone()
      .unwrap_or_else(|| source.to_string())
  }
}

/// Top-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub chess_com:            SourceConfig,
  pub lichess:              SourceConfig,
  pub user_agent:           String,
  /// Hard wall-clock limit for one HTTP call.
  pub request_timeout_ms:   u64,
  pub retry:                RetryPolicy,
  /// Games per write batch; clamped to `1..=10`.
  pub batch_size:           usize,
  pub inter_game_delay_ms:  u64,
  pub inter_batch_delay_ms: u64,
  /// Scores at or above this suspicion level raise a high-risk event.
  pub high_risk_threshold:  f64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      // Request-rate strict: small bursts, hard per-minute ceiling.
      chess_com:            SourceConfig {
        base_url:    "https://api.chess.com".to_string(),
        limits:      RateLimitConfig {
          per_second: 3,
          per_minute: Some(300),
          per_hour:   None,
          data_quota: None,
        },
        limiter_key: None,
      },
      // Volume strict: fast requests, bounded bytes per minute.
      lichess:              SourceConfig {
        base_url:    "https://lichess.org".to_string(),
        limits:      RateLimitConfig {
          per_second: 20,
          per_minute: None,
          per_hour:   Some(3_000),
          data_quota: Some(DataQuota {
            bytes:       2 * 1024 * 1024,
            interval_ms: 60_000,
          }),
        },
        limiter_key: None,
      },
      user_agent:           concat!("rook/", env!("CARGO_PKG_VERSION")).to_string(),
      request_timeout_ms:   15_000,
      retry:                RetryPolicy::default(),
      batch_size:           5,
      inter_game_delay_ms:  50,
      inter_batch_delay_ms: 500,
      high_risk_threshold:  0.8,
    }
  }
}

impl SyncConfig {
  /// Reject settings the pipeline cannot run with.
  pub fn validate(&self) -> Result<()> {
    for source in [SourceName::ChessCom, SourceName::Lichess] {
      if let Some(config) = self.source(source) {
        config
          .limits
          .validate()
          .map_err(|e| Error::Config(format!("{source} limits: {e}")))?;
      }
    }
    if self.request_timeout_ms == 0 {
      return Err(Error::Config("request_timeout_ms must be positive".to_string()));
    }
    Ok(())
  }

  pub fn source(&self, source: SourceName) -> Option<&SourceConfig> {
    match source {
      SourceName::ChessCom => Some(&self.chess_com),
      SourceName::Lichess => Some(&self.lichess),
      SourceName::Upload => None,
    }
  }

  pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }

  pub fn batch_size(&self) -> usize { self.batch_size.clamp(1, 10) }
}
