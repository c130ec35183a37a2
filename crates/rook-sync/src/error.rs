//! Error type for `rook-sync`.
//!
//! Only [`Error::SourceUnavailable`] and [`Error::Cancelled`] ever end a job
//! early; everything else is caught per record and recorded as an
//! [`crate::orchestrator::ImportIssue`].

use std::time::Duration;

use rook_core::game::SourceName;
use thiserror::Error;
use uuid::Uuid;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{platform} unavailable: {message}")]
  SourceUnavailable {
    platform: SourceName,
    message:  String,
  },

  #[error("invalid sync configuration: {0}")]
  Config(String),

  #[error("invalid import request: {0}")]
  InvalidRequest(String),

  #[error("{0} has no remote archive to fetch from")]
  NotFetchable(SourceName),

  #[error("transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("http client error: {0}")]
  Client(#[from] reqwest::Error),

  #[error("job cancelled")]
  Cancelled,

  #[error("job not found: {0}")]
  JobNotFound(Uuid),
}

impl Error {
  pub(crate) fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Worth another attempt after a backoff.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout(_) => true,
      Self::Transport(e) => e.is_transient(),
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
