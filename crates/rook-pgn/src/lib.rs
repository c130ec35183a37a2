//! Multi-game PGN parser for rook.
//!
//! Splits a blob of portable game notation into individual games and pulls
//! the header tags and cleaned movetext out of each. Pure synchronous; no
//! HTTP or database dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use rook_pgn::parse_many;
//!
//! let text = "[Event \"Casual\"]\n[White \"A\"]\n[Black \"B\"]\n\n1. e4 e5 1-0\n";
//! let outcome = parse_many(text);
//! println!("{} games, {} rejected", outcome.games.len(), outcome.rejections.len());
//! ```

pub mod error;
mod parse;

use std::collections::BTreeMap;

use chrono::NaiveDate;
pub use error::{Error, Result};
use serde::Serialize;

/// Sentinel used for required fields the block did not provide.
pub const UNKNOWN: &str = "Unknown";

// ─── Public types ────────────────────────────────────────────────────────────

/// One game extracted from a PGN block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PgnGame {
  /// All header tags, keys lower-cased.
  pub headers: BTreeMap<String, String>,
  pub white:   String,
  pub black:   String,
  /// The `Result` tag (`1-0`, `0-1`, `1/2-1/2`, `*`) or [`UNKNOWN`].
  pub result:  String,
  /// The raw `Date` tag (`YYYY.MM.DD`, possibly with `??`) or [`UNKNOWN`].
  pub date:    String,
  /// Movetext with comments, variations, NAGs and `!`/`?` markers removed.
  pub moves:   String,
  /// The block exactly as it appeared in the input, trimmed.
  pub text:    String,
}

impl PgnGame {
  pub fn header(&self, key: &str) -> Option<&str> {
    self
      .headers
      .get(&key.to_ascii_lowercase())
      .map(String::as_str)
      .filter(|v| !v.is_empty() && *v != "?")
  }

  /// The `Date` tag as a calendar date, if fully specified.
  pub fn played_on(&self) -> Option<NaiveDate> {
    parse::parse_pgn_date(&self.date)
  }

  pub fn white_elo(&self) -> Option<i32> {
    self.header("whiteelo").and_then(|v| v.parse().ok())
  }

  pub fn black_elo(&self) -> Option<i32> {
    self.header("blackelo").and_then(|v| v.parse().ok())
  }

  /// Opening name, falling back to the ECO code.
  pub fn opening(&self) -> Option<&str> {
    self.header("opening").or_else(|| self.header("eco"))
  }
}

/// Why one block of the input was not turned into a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
  /// Zero-based position of the block in the input.
  pub block:  usize,
  pub reason: Error,
}

/// Accepted games plus per-block rejection reasons.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
  pub games:      Vec<PgnGame>,
  pub rejections: Vec<Rejection>,
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Parse zero or more games from `input`.
///
/// Blocks are found by, in order of preference: a line-leading `[Event `
/// tag, blank-line separation, or the whole input as one game. A malformed
/// block is recorded in [`ParseOutcome::rejections`] without aborting the
/// rest.
pub fn parse_many(input: &str) -> ParseOutcome {
  let mut outcome = ParseOutcome::default();

  let blocks = parse::split_games(input);
  if blocks.is_empty() {
    outcome.rejections.push(Rejection {
      block:  0,
      reason: Error::EmptyInput,
    });
    return outcome;
  }

  for (block, text) in blocks.iter().enumerate() {
    match parse::parse_block(text) {
      Ok(game) => outcome.games.push(game),
      Err(reason) => outcome.rejections.push(Rejection { block, reason }),
    }
  }

  outcome
}

/// Parse `input` as exactly one game.
pub fn parse_one(input: &str) -> Result<PgnGame> {
  if input.trim().is_empty() {
    return Err(Error::EmptyInput);
  }
  parse::parse_block(input)
}
