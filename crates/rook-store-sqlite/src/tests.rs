//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::NaiveDate;
use rook_core::{
  cursor::{CursorAdvance, CursorUpdate},
  game::{GameResult, SourceName, player_hash},
  score::ScoreMetrics,
  store::{GameInsert, GameStore, NewGame, NewPlayer},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn player(s: &SqliteStore, name: &str) -> i64 {
  s.create_player(NewPlayer {
    hash:     player_hash(SourceName::Lichess, name),
    source:   SourceName::Lichess,
    username: name.to_string(),
    rating:   1500,
  })
  .await
  .unwrap()
}

fn game(player_id: i64, external_id: &str, occurred_at: i64) -> NewGame {
  NewGame {
    player_id,
    source: SourceName::Lichess,
    external_id: external_id.to_string(),
    played_on: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
    result: GameResult::Win,
    rating: 1510,
    time_control: "180+2".to_string(),
    opening: Some("Sicilian Defense".to_string()),
    occurred_at,
    pgn: "1. e4 c5 1-0".to_string(),
  }
}

fn update(identity: &str, occurred_at: i64, id: &str, by: u64) -> CursorUpdate {
  CursorUpdate {
    source:       SourceName::Lichess,
    identity:     identity.to_string(),
    occurred_at,
    external_id:  Some(id.to_string()),
    increment_by: by,
  }
}

// ─── Players ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_player_is_idempotent_per_hash() {
  let s = store().await;
  let hash = player_hash(SourceName::Lichess, "alice");

  assert_eq!(s.player_id(hash.clone()).await.unwrap(), None);
  let first = player(&s, "alice").await;
  let second = player(&s, "Alice").await;
  assert_eq!(first, second);
  assert_eq!(s.player_id(hash).await.unwrap(), Some(first));
}

#[tokio::test]
async fn update_player_rating_overwrites() {
  let s = store().await;
  let id = player(&s, "bob").await;
  s.update_player_rating(id, 1720).await.unwrap();
  assert_eq!(s.player_rating(id).await.unwrap(), Some(1720));
}

// ─── Games ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_game_is_rejected_by_constraint() {
  let s = store().await;
  let pid = player(&s, "carol").await;

  let first = s.create_game(game(pid, "g1", 100)).await.unwrap();
  assert!(matches!(first, GameInsert::Created(_)));

  let again = s.create_game(game(pid, "g1", 100)).await.unwrap();
  assert_eq!(again, GameInsert::AlreadyExists);

  assert!(s.game_exists(SourceName::Lichess, "g1".into()).await.unwrap());
  assert!(!s.game_exists(SourceName::ChessCom, "g1".into()).await.unwrap());
  assert_eq!(s.game_count(SourceName::Lichess).await.unwrap(), 1);
}

#[tokio::test]
async fn same_external_id_on_other_source_is_distinct() {
  let s = store().await;
  let pid = player(&s, "dave").await;
  s.create_game(game(pid, "shared", 1)).await.unwrap();

  let mut other = game(pid, "shared", 1);
  other.source = SourceName::ChessCom;
  assert!(matches!(
    s.create_game(other).await.unwrap(),
    GameInsert::Created(_)
  ));
}

#[tokio::test]
async fn score_is_one_to_one_with_game() {
  let s = store().await;
  let pid = player(&s, "erin").await;
  let GameInsert::Created(gid) = s.create_game(game(pid, "g2", 5)).await.unwrap() else {
    panic!("expected a new game");
  };

  let metrics = ScoreMetrics {
    engine_match_pct: 71.5,
    delta_cp:         22.0,
    run_perfect:      9,
    ml_prob:          0.4,
    suspicion_level:  0.35,
  };
  s.create_score(gid, metrics.clone()).await.unwrap();
  assert_eq!(s.score_for(gid).await.unwrap(), Some(metrics.clone()));

  let err = s.create_score(gid, metrics).await.unwrap_err();
  assert!(matches!(err, crate::Error::ScoreExists(id) if id == gid));
}

// ─── Cursors ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_advance_creates_cursor() {
  let s = store().await;
  assert!(s.get_cursor(SourceName::Lichess, "frank".into()).await.unwrap().is_none());

  let adv = s.advance_cursor(update("frank", 1_000, "a", 3)).await.unwrap();
  assert!(matches!(adv, CursorAdvance::Advanced(_)));

  let c = s.get_cursor(SourceName::Lichess, "frank".into()).await.unwrap().unwrap();
  assert_eq!(c.last_imported_at, 1_000);
  assert_eq!(c.last_external_id.as_deref(), Some("a"));
  assert_eq!(c.total_imported, 3);
}

#[tokio::test]
async fn older_timestamp_does_not_move_cursor_back() {
  let s = store().await;
  s.advance_cursor(update("gina", 2_000, "new", 1)).await.unwrap();

  let adv = s.advance_cursor(update("gina", 1_500, "old", 2)).await.unwrap();
  let CursorAdvance::Regressed(c) = adv else {
    panic!("expected regression");
  };
  assert_eq!(c.last_imported_at, 2_000);
  assert_eq!(c.last_external_id.as_deref(), Some("new"));
  assert_eq!(c.total_imported, 3);
}

#[tokio::test]
async fn concurrent_advances_keep_max_and_every_increment() {
  let s = store().await;

  let mut handles = Vec::new();
  for i in 0..20_i64 {
    let s = s.clone();
    // Deliberately out of order.
    let ts = (i * 7919) % 20 * 100;
    handles.push(tokio::spawn(async move {
      s.advance_cursor(update("hank", ts, &format!("g{ts}"), 1)).await.unwrap()
    }));
  }
  for h in handles {
    h.await.unwrap();
  }

  let c = s.get_cursor(SourceName::Lichess, "hank".into()).await.unwrap().unwrap();
  assert_eq!(c.last_imported_at, 1_900);
  assert_eq!(c.last_external_id.as_deref(), Some("g1900"));
  assert_eq!(c.total_imported, 20);
}

#[tokio::test]
async fn reset_cursor_deletes_row() {
  let s = store().await;
  s.advance_cursor(update("ivy", 10, "x", 1)).await.unwrap();

  assert!(s.reset_cursor(SourceName::Lichess, "ivy".into()).await.unwrap());
  assert!(!s.reset_cursor(SourceName::Lichess, "ivy".into()).await.unwrap());
  assert!(s.get_cursor(SourceName::Lichess, "ivy".into()).await.unwrap().is_none());
}
