//! Turning uploaded PGN games into [`RawGame`]s.
//!
//! Uploads carry no platform id, so the external id is a fingerprint of the
//! game itself: the same game uploaded twice dedups like any other.

use chrono::{NaiveDate, NaiveTime, Utc};
use rook_core::game::{GameResult, RawGame, SourceName};
use rook_pgn::PgnGame;
use sha2::{Digest, Sha256};

/// Stable id for an uploaded game: hex SHA-256 over the players, date,
/// result and cleaned movetext, truncated to 32 characters.
pub fn fingerprint(game: &PgnGame) -> String {
  let mut hasher = Sha256::new();
  for part in [&game.white, &game.black, &game.date, &game.result, &game.moves] {
    hasher.update(part.to_ascii_lowercase().as_bytes());
    hasher.update([0]);
  }
  let mut id = hex::encode(hasher.finalize());
  id.truncate(32);
  id
}

/// Normalise one parsed game for `identity`. When `identity` played neither
/// side the result is [`GameResult::Unknown`] and the rating 0.
pub fn to_raw_game(identity: &str, game: &PgnGame) -> RawGame {
  let subject_is_white = if game.white.eq_ignore_ascii_case(identity) {
    Some(true)
  } else if game.black.eq_ignore_ascii_case(identity) {
    Some(false)
  } else {
    None
  };

  let result = subject_is_white.map_or(GameResult::Unknown, |white| {
    GameResult::from_pgn_tag(&game.result, white)
  });
  let rating = match subject_is_white {
    Some(true) => game.white_elo(),
    Some(false) => game.black_elo(),
    None => None,
  }
  .unwrap_or(0);

  let played_on = game.played_on().unwrap_or_else(|| Utc::now().date_naive());

  RawGame {
    external_id: fingerprint(game),
    source: SourceName::Upload,
    pgn: game.text.clone(),
    played_on,
    result,
    rating,
    time_control: game.header("timecontrol").unwrap_or("-").to_string(),
    opening: game.opening().map(str::to_string),
    occurred_at: occurred_at(game, played_on),
  }
}

/// Date plus `UTCTime`/`Time` when present, else midnight.
fn occurred_at(game: &PgnGame, played_on: NaiveDate) -> i64 {
  let time = game
    .header("utctime")
    .or_else(|| game.header("time"))
    .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M:%S").ok())
    .unwrap_or(NaiveTime::MIN);
  played_on.and_time(time).and_utc().timestamp()
}

#[cfg(test)]
mod tests {
  use super::*;

  const GAME: &str = "\
[Event \"Club\"]
[Date \"2024.02.10\"]
[UTCTime \"18:30:00\"]
[White \"Alice\"]
[Black \"Bob\"]
[WhiteElo \"1810\"]
[BlackElo \"1750\"]
[Result \"0-1\"]
[TimeControl \"600+5\"]
[ECO \"C50\"]

1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 0-1
";

  #[test]
  fn perspective_follows_identity() {
    let game = rook_pgn::parse_one(GAME).unwrap();

    let alice = to_raw_game("alice", &game);
    assert_eq!(alice.result, GameResult::Loss);
    assert_eq!(alice.rating, 1810);
    assert_eq!(alice.time_control, "600+5");
    assert_eq!(alice.opening.as_deref(), Some("C50"));
    assert_eq!(alice.occurred_at, 1_707_589_800);

    let bob = to_raw_game("BOB", &game);
    assert_eq!(bob.result, GameResult::Win);
    assert_eq!(bob.rating, 1750);
    assert_eq!(bob.external_id, alice.external_id);

    let stranger = to_raw_game("carol", &game);
    assert_eq!(stranger.result, GameResult::Unknown);
    assert_eq!(stranger.rating, 0);
  }

  #[test]
  fn fingerprint_ignores_comments_but_not_moves() {
    let a = rook_pgn::parse_one(GAME).unwrap();
    let b = rook_pgn::parse_one(&GAME.replace("3. Bc4", "3. Bc4 {Italian}")).unwrap();
    let c = rook_pgn::parse_one(&GAME.replace("Bc5", "Nf6")).unwrap();
    assert_eq!(fingerprint(&a), fingerprint(&b));
    assert_ne!(fingerprint(&a), fingerprint(&c));
    assert_eq!(fingerprint(&a).len(), 32);
  }
}
