//! Archive-paginated adapter (chess.com).
//!
//! The listing at `/pub/player/{user}/games/archives` names one URL per
//! month, oldest first. Months are walked newest first and each page's games
//! sorted by end time, newest first, so the walk can stop as soon as it
//! reaches the cursor.

use chrono::{DateTime, Datelike as _, NaiveDate};
use rook_core::{
  game::{GameResult, RawGame, SourceName},
  store::GameStore,
};
use serde::Deserialize;

use super::{
  EventStream, FetchRequest, GameSource, SkipReason, SourceEvent, endpoint, unavailable,
};
use crate::{
  Error,
  dedup::DedupGate,
  fetch::Fetcher,
  transport::{HttpRequest, HttpTransport},
};

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ArchiveList {
  #[serde(default)]
  archives: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MonthPage {
  #[serde(default)]
  games: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireGame {
  #[serde(default)]
  url:          String,
  #[serde(default)]
  uuid:         Option<String>,
  #[serde(default)]
  pgn:          String,
  end_time:     Option<i64>,
  #[serde(default)]
  time_control: String,
  #[serde(default)]
  eco:          Option<String>,
  white:        WireSide,
  black:        WireSide,
}

#[derive(Debug, Deserialize)]
struct WireSide {
  #[serde(default)]
  username: String,
  #[serde(default)]
  rating:   i32,
  #[serde(default)]
  result:   String,
}

impl WireGame {
  fn external_id(&self) -> Option<String> {
    let from_url = self
      .url
      .trim_end_matches('/')
      .rsplit('/')
      .next()
      .filter(|s| !s.is_empty() && !s.contains(':'));
    from_url
      .map(str::to_string)
      .or_else(|| self.uuid.clone().filter(|u| !u.is_empty()))
  }

  fn normalize(self, identity: &str) -> Result<RawGame, String> {
    let external_id = self.external_id().ok_or("game has no url or uuid")?;
    let occurred_at = self.end_time.ok_or("game has no end_time")?;
    let played_on = DateTime::from_timestamp(occurred_at, 0)
      .ok_or("end_time out of range")?
      .date_naive();
    if self.pgn.trim().is_empty() {
      return Err(format!("game {external_id} has no PGN"));
    }

    let subject = if self.white.username.eq_ignore_ascii_case(identity) {
      &self.white
    } else if self.black.username.eq_ignore_ascii_case(identity) {
      &self.black
    } else {
      return Err(format!("{identity} did not play game {external_id}"));
    };

    let opening = self
      .eco
      .as_deref()
      .and_then(opening_from_url)
      .or_else(|| {
        rook_pgn::parse_one(&self.pgn)
          .ok()
          .and_then(|g| g.opening().map(str::to_string))
      });

    Ok(RawGame {
      external_id,
      source: SourceName::ChessCom,
      result: result_code(&subject.result),
      rating: subject.rating,
      time_control: if self.time_control.is_empty() {
        "-".to_string()
      } else {
        self.time_control.clone()
      },
      opening,
      played_on,
      occurred_at,
      pgn: self.pgn,
    })
  }
}

/// Map a per-side result code to the outcome for that side.
fn result_code(code: &str) -> GameResult {
  match code {
    "win" => GameResult::Win,
    "agreed" | "repetition" | "stalemate" | "insufficient" | "50move" | "timevsinsufficient" => {
      GameResult::Draw
    }
    "checkmated" | "timeout" | "resigned" | "lose" | "abandoned" | "kingofthehill"
    | "threecheck" | "bughousepartnerlose" => GameResult::Loss,
    _ => GameResult::Unknown,
  }
}

/// `https://www.chess.com/openings/Sicilian-Defense-Najdorf` → `Sicilian
/// Defense Najdorf`.
fn opening_from_url(url: &str) -> Option<String> {
  let slug = url.trim_end_matches('/').rsplit('/').next()?;
  (!slug.is_empty() && slug != "openings").then(|| slug.replace('-', " "))
}

/// First second after the month an archive URL (`…/YYYY/MM`) covers.
fn month_end(url: &str) -> Option<i64> {
  let mut parts = url.trim_end_matches('/').rsplit('/');
  let month: u32 = parts.next()?.parse().ok()?;
  let year: i32 = parts.next()?.parse().ok()?;
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  let next = if first.month() == 12 {
    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
  } else {
    NaiveDate::from_ymd_opt(year, month + 1, 1)?
  };
  Some(next.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

pub struct ArchiveSource<T> {
  fetcher:  Fetcher<T>,
  base_url: String,
}

impl<T: HttpTransport> ArchiveSource<T> {
  pub fn new(fetcher: Fetcher<T>, base_url: impl Into<String>) -> Self {
    Self {
      fetcher,
      base_url: base_url.into().trim_end_matches('/').to_string(),
    }
  }

  fn archives_url(&self, identity: &str) -> crate::Result<String> {
    endpoint(&self.base_url, &["pub", "player", identity, "games", "archives"])
  }
}

impl<T: HttpTransport> GameSource for ArchiveSource<T> {
  fn name(&self) -> SourceName { SourceName::ChessCom }

  fn fetch_games<'a, S: GameStore>(
    &'a self,
    request: FetchRequest,
    dedup: &'a DedupGate<S>,
  ) -> EventStream<'a> {
    Box::pin(async_stream::stream! {
      let FetchRequest { identity, limit, cursor, cancel } = request;
      if limit == 0 {
        return;
      }

      let archives_url = match self.archives_url(&identity) {
        Ok(url) => url,
        Err(e) => {
          yield Err(e);
          return;
        }
      };
      let listing = match self.fetcher.get(HttpRequest::json(archives_url), &cancel).await {
        Ok(body) => body,
        Err(e) => {
          yield Err(unavailable(self.name(), e));
          return;
        }
      };
      let listing: ArchiveList = match serde_json::from_str(&listing) {
        Ok(list) => list,
        Err(e) => {
          yield Err(Error::SourceUnavailable {
            platform: self.name(),
            message:  format!("unreadable archive listing: {e}"),
          });
          return;
        }
      };
      tracing::debug!(%identity, months = listing.archives.len(), "archive listing fetched");

      let mut yielded = 0;
      'months: for month_url in listing.archives.iter().rev() {
        let behind_cursor = match (&cursor, month_end(month_url)) {
          (Some(c), Some(end)) => c.covers(end - 1),
          _ => false,
        };
        if behind_cursor {
          tracing::debug!(%identity, %month_url, "reached cursor month; stopping");
          break;
        }

        let body = match self.fetcher.get(HttpRequest::json(month_url.clone()), &cancel).await {
          Ok(body) => body,
          Err(Error::Cancelled) => {
            yield Err(Error::Cancelled);
            return;
          }
          Err(e) => {
            tracing::warn!(%identity, %month_url, error = %e, "archive page unavailable; skipping");
            yield Ok(SourceEvent::Unreachable {
              reference: month_url.clone(),
              error:     e.to_string(),
            });
            continue;
          }
        };
        let page: MonthPage = match serde_json::from_str(&body) {
          Ok(page) => page,
          Err(e) => {
            yield Ok(SourceEvent::Malformed {
              reference: month_url.clone(),
              reason:    e.to_string(),
            });
            continue;
          }
        };

        let mut games = Vec::with_capacity(page.games.len());
        for (i, value) in page.games.into_iter().enumerate() {
          let reference = format!("{month_url}#{i}");
          match serde_json::from_value::<WireGame>(value) {
            Ok(wire) => match wire.normalize(&identity) {
              Ok(game) => games.push(game),
              Err(reason) => {
                yield Ok(SourceEvent::Malformed { reference, reason });
              }
            },
            Err(e) => {
              yield Ok(SourceEvent::Malformed { reference, reason: e.to_string() });
            }
          }
        }
        games.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        for game in games {
          if cursor.as_ref().is_some_and(|c| c.covers(game.occurred_at)) {
            tracing::debug!(%identity, external_id = %game.external_id, "reached cursor; stopping");
            break 'months;
          }
          if dedup.exists(self.name(), &game.external_id).await {
            yield Ok(SourceEvent::Skipped {
              external_id: game.external_id,
              reason:      SkipReason::AlreadyImported,
            });
            continue;
          }
          yield Ok(SourceEvent::Game(game));
          yielded += 1;
          if yielded >= limit {
            break 'months;
          }
        }
      }
    })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;
  use futures::StreamExt as _;
  use rook_core::cursor::SyncCursor;
  use rook_store_sqlite::SqliteStore;
  use tokio_util::sync::CancellationToken;

  use super::*;
  use crate::{source::fixtures::*, transport::testing::FakeTransport};

  const MAR_2: i64 = 1_709_337_600; // 2024-03-02T00:00:00Z
  const APR_2: i64 = 1_712_016_000; // 2024-04-02T00:00:00Z

  async fn collect(
    transport: &FakeTransport,
    limit: usize,
    cursor: Option<SyncCursor>,
  ) -> Vec<crate::Result<SourceEvent>> {
    let source = ArchiveSource::new(fetcher(transport.clone()), CHESS_COM);
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let gate = DedupGate::new(store);
    source
      .fetch_games(
        FetchRequest {
          identity: "alice".to_string(),
          limit,
          cursor,
          cancel: CancellationToken::new(),
        },
        &gate,
      )
      .collect()
      .await
  }

  fn ids(events: &[crate::Result<SourceEvent>]) -> Vec<String> {
    events
      .iter()
      .filter_map(|e| match e {
        Ok(SourceEvent::Game(g)) => Some(g.external_id.clone()),
        _ => None,
      })
      .collect()
  }

  fn script_two_months(t: &FakeTransport) {
    t.body(&archives_url("alice"), archives("alice", &["2024/03", "2024/04"]));
    t.body(
      &month_url("alice", "2024/03"),
      page(vec![
        cc_game(1, MAR_2, ("Alice", "win"), ("bob", "resigned")),
        cc_game(2, MAR_2 + 60, ("bob", "win"), ("alice", "checkmated")),
      ]),
    );
    t.body(
      &month_url("alice", "2024/04"),
      page(vec![
        cc_game(3, APR_2, ("carol", "agreed"), ("alice", "agreed")),
        cc_game(4, APR_2 + 60, ("alice", "timeout"), ("carol", "win")),
      ]),
    );
  }

  #[test]
  fn result_codes_map_from_subject_side() {
    assert_eq!(result_code("win"), GameResult::Win);
    assert_eq!(result_code("repetition"), GameResult::Draw);
    assert_eq!(result_code("timevsinsufficient"), GameResult::Draw);
    assert_eq!(result_code("abandoned"), GameResult::Loss);
    assert_eq!(result_code("bughousepartnerwin"), GameResult::Unknown);
  }

  #[test]
  fn month_end_handles_december() {
    let end = month_end("https://x/pub/player/a/games/2023/12").unwrap();
    assert_eq!(end, 1_704_067_200); // 2024-01-01
    assert_eq!(month_end("https://x/archives"), None);
  }

  #[tokio::test]
  async fn walks_months_newest_first() {
    let t = FakeTransport::new();
    script_two_months(&t);

    let events = collect(&t, 10, None).await;
    assert_eq!(ids(&events), ["4", "3", "2", "1"]);

    let Ok(SourceEvent::Game(g)) = &events[0] else { panic!("expected a game") };
    assert_eq!(g.result, GameResult::Loss);
    assert_eq!(g.opening.as_deref(), Some("Kings Pawn Opening"));
    let Ok(SourceEvent::Game(g)) = &events[1] else { panic!("expected a game") };
    assert_eq!(g.result, GameResult::Draw);
    assert_eq!(g.rating, 1550);
  }

  #[tokio::test]
  async fn stops_at_limit_without_fetching_older_months() {
    let t = FakeTransport::new();
    script_two_months(&t);

    let events = collect(&t, 2, None).await;
    assert_eq!(ids(&events), ["4", "3"]);
    assert_eq!(t.calls_to(&month_url("alice", "2024/03")), 0);
  }

  #[tokio::test]
  async fn stops_at_cursor_boundary() {
    let t = FakeTransport::new();
    script_two_months(&t);
    let cursor = SyncCursor {
      source:           SourceName::ChessCom,
      identity:         "alice".to_string(),
      last_imported_at: APR_2,
      last_external_id: Some("3".to_string()),
      total_imported:   3,
      updated_at:       Utc::now(),
    };

    let events = collect(&t, 10, Some(cursor)).await;
    assert_eq!(ids(&events), ["4"]);
    assert_eq!(t.calls_to(&month_url("alice", "2024/03")), 0);
  }

  #[tokio::test]
  async fn failed_page_is_reported_and_skipped() {
    let t = FakeTransport::new();
    t.body(&archives_url("alice"), archives("alice", &["2024/03", "2024/04"]));
    t.status(&month_url("alice", "2024/04"), 500);
    t.body(
      &month_url("alice", "2024/03"),
      page(vec![cc_game(1, MAR_2, ("alice", "win"), ("bob", "resigned"))]),
    );

    let events = collect(&t, 10, None).await;
    assert!(matches!(&events[0], Ok(SourceEvent::Unreachable { .. })));
    assert_eq!(ids(&events), ["1"]);
  }

  #[tokio::test]
  async fn bad_record_does_not_spoil_its_page() {
    let t = FakeTransport::new();
    t.body(&archives_url("alice"), archives("alice", &["2024/03"]));
    t.body(
      &month_url("alice", "2024/03"),
      page(vec![
        serde_json::json!({ "url": "https://www.chess.com/game/live/9" }),
        cc_game(1, MAR_2, ("alice", "win"), ("bob", "resigned")),
      ]),
    );

    let events = collect(&t, 10, None).await;
    assert_eq!(
      events
        .iter()
        .filter(|e| matches!(e, Ok(SourceEvent::Malformed { .. })))
        .count(),
      1
    );
    assert_eq!(ids(&events), ["1"]);
  }

  #[tokio::test]
  async fn unreachable_listing_fails_the_job() {
    let t = FakeTransport::new();
    t.status(&archives_url("alice"), 503);

    let events = collect(&t, 10, None).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
      events[0],
      Err(Error::SourceUnavailable {
        platform: SourceName::ChessCom,
        ..
      })
    ));
    assert_eq!(t.calls_to(&archives_url("alice")), 2);
  }
}
