//! Error type for `rook-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rook_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("game {0} already has a score")]
  ScoreExists(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
