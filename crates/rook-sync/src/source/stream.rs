//! Streaming-record adapter (lichess).
//!
//! One request to `/api/games/user/{user}` returns newline-delimited JSON,
//! newest first, bounded by `max` and starting after `since` (unix ms). The
//! export trickles in for as long as it takes, so records are parsed and
//! yielded as each line arrives. The ordering and the `since` filter are
//! re-checked locally.

use rook_core::{
  game::{GameResult, RawGame, SourceName},
  store::GameStore,
};
use serde::Deserialize;

use super::{EventStream, FetchRequest, GameSource, SkipReason, SourceEvent, endpoint, unavailable};
use crate::{
  Error, Result,
  dedup::DedupGate,
  fetch::Fetcher,
  transport::{HttpRequest, HttpTransport},
};

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGame {
  id:           String,
  created_at:   Option<i64>,
  last_move_at: Option<i64>,
  #[serde(default)]
  speed:        String,
  #[serde(default)]
  status:       String,
  winner:       Option<String>,
  players:      WirePlayers,
  opening:      Option<WireOpening>,
  clock:        Option<WireClock>,
  #[serde(default)]
  pgn:          String,
  #[serde(default)]
  moves:        String,
}

#[derive(Debug, Deserialize)]
struct WirePlayers {
  white: WirePlayer,
  black: WirePlayer,
}

#[derive(Debug, Default, Deserialize)]
struct WirePlayer {
  user:   Option<WireUser>,
  rating: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
  name: String,
}

#[derive(Debug, Deserialize)]
struct WireOpening {
  name: String,
}

#[derive(Debug, Deserialize)]
struct WireClock {
  initial:   u32,
  increment: u32,
}

impl WirePlayer {
  fn is(&self, identity: &str) -> bool {
    self
      .user
      .as_ref()
      .is_some_and(|u| u.name.eq_ignore_ascii_case(identity))
  }
}

impl WireGame {
  fn normalize(self, identity: &str) -> Result<RawGame, String> {
    let millis = self
      .last_move_at
      .or(self.created_at)
      .ok_or_else(|| format!("game {} has no timestamp", self.id))?;
    let occurred_at = millis.div_euclid(1_000);
    let played_on = chrono::DateTime::from_timestamp(occurred_at, 0)
      .ok_or_else(|| format!("game {} timestamp out of range", self.id))?
      .date_naive();

    let (side, subject) = if self.players.white.is(identity) {
      ("white", &self.players.white)
    } else if self.players.black.is(identity) {
      ("black", &self.players.black)
    } else {
      return Err(format!("{identity} did not play game {}", self.id));
    };

    let result = match self.winner.as_deref() {
      Some(winner) if winner == side => GameResult::Win,
      Some(_) => GameResult::Loss,
      None if matches!(self.status.as_str(), "draw" | "stalemate" | "outoftime") => {
        GameResult::Draw
      }
      None => GameResult::Unknown,
    };

    let time_control = match (&self.clock, self.speed.is_empty()) {
      (Some(c), _) => format!("{}+{}", c.initial, c.increment),
      (None, false) => self.speed.clone(),
      (None, true) => "-".to_string(),
    };

    let pgn = if !self.pgn.trim().is_empty() {
      self.pgn
    } else if !self.moves.trim().is_empty() {
      self.moves
    } else {
      return Err(format!("game {} has no moves", self.id));
    };

    Ok(RawGame {
      external_id: self.id,
      source: SourceName::Lichess,
      result,
      rating: subject.rating.unwrap_or(0),
      time_control,
      opening: self.opening.map(|o| o.name),
      played_on,
      occurred_at,
      pgn,
    })
  }
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

pub struct StreamSource<T> {
  fetcher:  Fetcher<T>,
  base_url: String,
}

impl<T: HttpTransport> StreamSource<T> {
  pub fn new(fetcher: Fetcher<T>, base_url: impl Into<String>) -> Self {
    Self {
      fetcher,
      base_url: base_url.into().trim_end_matches('/').to_string(),
    }
  }

  fn request(&self, request: &FetchRequest) -> Result<HttpRequest> {
    let url = endpoint(&self.base_url, &["api", "games", "user", &request.identity])?;
    let mut http = HttpRequest::ndjson(url)
      .param("max", request.limit)
      .param("pgnInJson", true)
      .param("opening", true)
      .param("sort", "dateDesc");
    if let Some(cursor) = &request.cursor {
      http = http.param("since", (cursor.last_imported_at + 1) * 1_000);
    }
    Ok(http)
  }
}

impl<T: HttpTransport> GameSource for StreamSource<T> {
  fn name(&self) -> SourceName { SourceName::Lichess }

  fn fetch_games<'a, S: GameStore>(
    &'a self,
    request: FetchRequest,
    dedup: &'a DedupGate<S>,
  ) -> EventStream<'a> {
    Box::pin(async_stream::stream! {
      if request.limit == 0 {
        return;
      }
      let http = match self.request(&request) {
        Ok(http) => http,
        Err(e) => {
          yield Err(e);
          return;
        }
      };
      let url = http.url.clone();
      let FetchRequest { identity, limit, cursor, cancel } = request;

      let mut body = match self.fetcher.open(http, &cancel).await {
        Ok(body) => body,
        Err(e) => {
          yield Err(unavailable(self.name(), e));
          return;
        }
      };

      let mut yielded = 0;
      let mut previous: Option<i64> = None;
      let mut warned_order = false;
      let mut n = 0;

      loop {
        let line = match body.next_line(&cancel).await {
          None => break,
          Some(Ok(line)) => line,
          Some(Err(Error::Cancelled)) => {
            yield Err(Error::Cancelled);
            return;
          }
          Some(Err(e)) => {
            tracing::warn!(%identity, %url, after_line = n, error = %e, "game stream broke off");
            yield Ok(SourceEvent::Unreachable {
              reference: format!("{url} after line {n}"),
              error:     e.to_string(),
            });
            break;
          }
        };
        n += 1;
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        let reference = format!("line {n}");

        let wire: WireGame = match serde_json::from_str(line) {
          Ok(wire) => wire,
          Err(e) => {
            yield Ok(SourceEvent::Malformed { reference, reason: e.to_string() });
            continue;
          }
        };
        let game = match wire.normalize(&identity) {
          Ok(game) => game,
          Err(reason) => {
            yield Ok(SourceEvent::Malformed { reference, reason });
            continue;
          }
        };

        let out_of_order = previous.is_some_and(|p| game.occurred_at > p);
        if out_of_order && !warned_order {
          tracing::warn!(%identity, external_id = %game.external_id, "stream is not newest-first");
          warned_order = true;
        }
        previous = Some(game.occurred_at);

        if cursor.as_ref().is_some_and(|c| c.covers(game.occurred_at)) {
          yield Ok(SourceEvent::Skipped {
            external_id: game.external_id,
            reason:      SkipReason::BehindCursor,
          });
          continue;
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
          break;
        }
      }
    })
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
