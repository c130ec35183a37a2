//! Rejection reasons for the PGN splitter and block parser.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  #[error("input contains no game text")]
  EmptyInput,

  #[error("block has headers but no movetext")]
  NoMoveText,

  #[error("movetext has no move numbers: {0:?}")]
  NoMoveNumbers(String),

  #[error("block has neither player names nor moves")]
  MissingPlayersAndMoves,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
