//! PGN splitter and block parser.
//!
//! Pipeline:
//!   raw &str
//!     └─ split_games()          → Vec<String> (one block per game)
//!          └─ parse_block()     → headers + raw movetext
//!               └─ clean_movetext() → PgnGame

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
  PgnGame, UNKNOWN,
  error::{Error, Result},
};

const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

// ─── Splitting ───────────────────────────────────────────────────────────────

/// `[Event "…"]` opens a game; games written by any mainstream tool start
/// with it, which makes it the most reliable delimiter.
fn is_game_start(line: &str) -> bool {
  line
    .trim_start()
    .strip_prefix("[Event")
    .is_some_and(|rest| rest.starts_with([' ', '\t', '"']))
}

fn is_header_line(line: &str) -> bool {
  let line = line.trim();
  line.starts_with('[') && line.ends_with(']')
}

/// Split `input` into one text block per candidate game.
pub(crate) fn split_games(input: &str) -> Vec<String> {
  let lines: Vec<&str> = input.lines().collect();

  let blocks = if lines.iter().any(|l| is_game_start(l)) {
    split_on_markers(&lines)
  } else if has_blank_separator(&lines) {
    split_on_blank_lines(&lines)
  } else {
    vec![lines.join("\n")]
  };

  blocks
    .into_iter()
    .filter(|b| !b.trim().is_empty())
    .collect()
}

fn split_on_markers(lines: &[&str]) -> Vec<String> {
  let mut blocks = Vec::new();
  let mut current: Vec<&str> = Vec::new();

  for line in lines {
    if is_game_start(line) && current.iter().any(|l| !l.trim().is_empty()) {
      blocks.push(current.join("\n"));
      current.clear();
    }
    current.push(line);
  }
  if !current.is_empty() {
    blocks.push(current.join("\n"));
  }

  blocks
}

fn has_blank_separator(lines: &[&str]) -> bool {
  let first = lines.iter().position(|l| !l.trim().is_empty());
  let last = lines.iter().rposition(|l| !l.trim().is_empty());
  match (first, last) {
    (Some(first), Some(last)) => {
      lines[first..last].iter().any(|l| l.trim().is_empty())
    }
    _ => false,
  }
}

/// Split on blank lines, then re-attach a headers-only group to the movetext
/// group that follows it (standard PGN puts a blank line between the two).
fn split_on_blank_lines(lines: &[&str]) -> Vec<String> {
  let mut groups: Vec<Vec<&str>> = Vec::new();
  let mut current: Vec<&str> = Vec::new();

  for line in lines {
    if line.trim().is_empty() {
      if !current.is_empty() {
        groups.push(std::mem::take(&mut current));
      }
    } else {
      current.push(line);
    }
  }
  if !current.is_empty() {
    groups.push(current);
  }

  let mut blocks = Vec::new();
  let mut iter = groups.into_iter().peekable();
  while let Some(group) = iter.next() {
    let headers_only = group.iter().all(|l| is_header_line(l));
    let next_is_movetext = iter
      .peek()
      .is_some_and(|next| !next.iter().any(|l| is_header_line(l)));

    if headers_only && next_is_movetext {
      let moves = iter.next().unwrap_or_default();
      blocks.push(format!("{}\n\n{}", group.join("\n"), moves.join("\n")));
    } else {
      blocks.push(group.join("\n"));
    }
  }

  blocks
}

// ─── Headers ─────────────────────────────────────────────────────────────────

/// Parse a `[Key "Value"]` line. Returns `None` for anything else.
fn parse_header_line(line: &str) -> Option<(String, String)> {
  let inner = line.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
  let split = inner.find(char::is_whitespace)?;
  let (key, rest) = inner.split_at(split);

  if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return None;
  }

  let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
  let value = value.replace("\\\"", "\"").replace("\\\\", "\\");
  Some((key.to_ascii_lowercase(), value))
}

fn named(headers: &BTreeMap<String, String>, key: &str) -> Option<String> {
  headers
    .get(key)
    .map(|v| v.trim())
    .filter(|v| !v.is_empty() && *v != "?")
    .map(str::to_string)
}

/// Split `"Alice vs. Bob"` / `"Alice vs Bob"` into the two names.
fn split_versus(line: &str) -> Option<(String, String)> {
  let lower = line.to_ascii_lowercase();
  let (at, sep_len) = lower
    .find(" vs. ")
    .map(|i| (i, 5))
    .or_else(|| lower.find(" vs ").map(|i| (i, 4)))?;

  let white = line[..at].trim();
  let black = line[at + sep_len..].trim();
  if white.is_empty() || black.is_empty() {
    return None;
  }
  Some((white.to_string(), black.to_string()))
}

pub(crate) fn parse_pgn_date(value: &str) -> Option<NaiveDate> {
  let mut parts = value.trim().split(['.', '-', '/']);
  let year = parts.next()?.parse().ok()?;
  let month = parts.next()?.parse().ok()?;
  let day = parts.next()?.parse().ok()?;
  NaiveDate::from_ymd_opt(year, month, day)
}

// ─── Movetext ────────────────────────────────────────────────────────────────

/// Strip `{…}` and `;` comments, `(…)` variations (nested), `$n` NAGs and
/// `!`/`?` markers, then collapse whitespace.
fn clean_movetext(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut in_brace = false;
  let mut in_line_comment = false;
  let mut depth = 0usize;
  let mut chars = raw.chars().peekable();

  while let Some(c) = chars.next() {
    if in_line_comment {
      if c == '\n' {
        in_line_comment = false;
        out.push(' ');
      }
      continue;
    }
    if in_brace {
      if c == '}' {
        in_brace = false;
        out.push(' ');
      }
      continue;
    }

    match c {
      '{' => in_brace = true,
      ';' => in_line_comment = true,
      '(' => depth += 1,
      ')' => {
        depth = depth.saturating_sub(1);
        out.push(' ');
      }
      _ if depth > 0 => {}
      '$' => {
        while chars.next_if(|d| d.is_ascii_digit()).is_some() {}
        out.push(' ');
      }
      '!' | '?' => {}
      c if c.is_whitespace() => out.push(' '),
      c => out.push(c),
    }
  }

  out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// At least one digit immediately followed by a period (`1.`, `23...`).
fn has_move_number(moves: &str) -> bool {
  moves
    .as_bytes()
    .windows(2)
    .any(|w| w[0].is_ascii_digit() && w[1] == b'.')
}

// ─── Block parser ────────────────────────────────────────────────────────────

pub(crate) fn parse_block(text: &str) -> Result<PgnGame> {
  let mut headers = BTreeMap::new();
  let mut move_lines: Vec<&str> = Vec::new();
  let mut first_line: Option<&str> = None;

  for line in text.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }
    if first_line.is_none() {
      first_line = Some(trimmed);
    }

    // `%` escapes a line from PGN processing entirely.
    if trimmed.starts_with('%') {
      continue;
    }
    if is_header_line(trimmed) {
      if let Some((key, value)) = parse_header_line(trimmed) {
        headers.insert(key, value);
      }
      continue;
    }

    move_lines.push(trimmed);
  }

  let mut white = named(&headers, "white");
  let mut black = named(&headers, "black");
  if white.is_none()
    && black.is_none()
    && let Some(line) = first_line
  {
    let from_header = parse_header_line(line).map(|(_, v)| v);
    let candidate = from_header.clone().unwrap_or_else(|| line.to_string());
    if let Some((w, b)) = split_versus(&candidate) {
      white = Some(w);
      black = Some(b);
      // A bare "A vs. B" title line is not movetext.
      if from_header.is_none() && move_lines.first() == Some(&line) {
        move_lines.remove(0);
      }
    }
  }

  let moves = clean_movetext(&move_lines.join("\n"));

  if moves.is_empty() {
    return Err(if white.is_none() && black.is_none() {
      Error::MissingPlayersAndMoves
    } else {
      Error::NoMoveText
    });
  }
  if !has_move_number(&moves) {
    return Err(Error::NoMoveNumbers(moves.chars().take(40).collect()));
  }

  let result = named(&headers, "result")
    .or_else(|| {
      moves
        .rsplit(' ')
        .next()
        .filter(|t| RESULT_TOKENS.contains(t))
        .map(str::to_string)
    })
    .unwrap_or_else(|| UNKNOWN.to_string());

  let date = named(&headers, "date")
    .or_else(|| named(&headers, "utcdate"))
    .unwrap_or_else(|| UNKNOWN.to_string());

  Ok(PgnGame {
    headers,
    white: white.unwrap_or_else(|| UNKNOWN.to_string()),
    black: black.unwrap_or_else(|| UNKNOWN.to_string()),
    result,
    date,
    moves,
    text: text.trim().to_string(),
  })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse_many;

  const THREE_GAMES: &str = "\
[White \"Alice\"]
[Black \"Bob\"]
[Result \"1-0\"]
[Date \"2024.01.05\"]

1. e4 e5 2. Qh5 Nc6 3. Bc4 Nf6 4. Qxf7# 1-0

[White \"Carol\"]
[Black \"Dave\"]
[Result \"0-1\"]
[Date \"2024.02.10\"]

1. f3 e5 2. g4 Qh4# 0-1

[White \"Erin\"]
[Black \"Frank\"]
[Result \"1/2-1/2\"]
[Date \"2024.03.15\"]

1. d4 d5 2. c4 e6 1/2-1/2
";

  // ── Splitting ───────────────────────────────────────────────────────────

  #[test]
  fn three_games_separated_by_blank_lines() {
    let outcome = parse_many(THREE_GAMES);
    assert!(outcome.rejections.is_empty(), "{:?}", outcome.rejections);
    assert_eq!(outcome.games.len(), 3);

    let g = &outcome.games;
    assert_eq!((g[0].white.as_str(), g[0].black.as_str()), ("Alice", "Bob"));
    assert_eq!(g[0].result, "1-0");
    assert_eq!(g[0].played_on(), NaiveDate::from_ymd_opt(2024, 1, 5));
    assert_eq!((g[1].white.as_str(), g[1].black.as_str()), ("Carol", "Dave"));
    assert_eq!(g[1].result, "0-1");
    assert_eq!(g[1].played_on(), NaiveDate::from_ymd_opt(2024, 2, 10));
    assert_eq!((g[2].white.as_str(), g[2].black.as_str()), ("Erin", "Frank"));
    assert_eq!(g[2].result, "1/2-1/2");
    assert_eq!(g[2].played_on(), NaiveDate::from_ymd_opt(2024, 3, 15));
  }

  #[test]
  fn event_markers_split_games_without_blank_lines() {
    let input = "\
[Event \"Rated Blitz\"]
[White \"a\"]
[Black \"b\"]
1. e4 e5 1-0
[Event \"Rated Blitz\"]
[White \"c\"]
[Black \"d\"]
1. d4 d5 0-1
";
    let blocks = split_games(input);
    assert_eq!(blocks.len(), 2);
    let outcome = parse_many(input);
    assert_eq!(outcome.games.len(), 2);
    assert_eq!(outcome.games[1].white, "c");
  }

  #[test]
  fn unmarked_single_block_is_one_game() {
    let outcome = parse_many("1. e4 c5 2. Nf3 d6 *");
    assert_eq!(outcome.games.len(), 1);
    assert_eq!(outcome.games[0].white, UNKNOWN);
    assert_eq!(outcome.games[0].result, "*");
    assert_eq!(outcome.games[0].date, UNKNOWN);
  }

  #[test]
  fn empty_input_is_reported() {
    let outcome = parse_many("  \n\n ");
    assert!(outcome.games.is_empty());
    assert_eq!(outcome.rejections[0].reason, Error::EmptyInput);
  }

  // ── Rejections ──────────────────────────────────────────────────────────

  #[test]
  fn headers_only_block_is_rejected() {
    let input = "\
[Event \"One\"]
[White \"a\"]
[Black \"b\"]

1. e4 e5 1-0

[Event \"Two\"]
[White \"c\"]
[Black \"d\"]
";
    let outcome = parse_many(input);
    assert_eq!(outcome.games.len(), 1);
    assert_eq!(outcome.rejections.len(), 1);
    assert_eq!(outcome.rejections[0].block, 1);
    assert_eq!(outcome.rejections[0].reason, Error::NoMoveText);
  }

  #[test]
  fn truncated_movetext_without_numbers_is_rejected() {
    let err = parse_block("[White \"a\"]\n[Black \"b\"]\n\ne4 e5 Nf3").unwrap_err();
    assert!(matches!(err, Error::NoMoveNumbers(_)));
  }

  #[test]
  fn no_names_and_no_moves_is_rejected() {
    let err = parse_block("[Event \"Nothing\"]\n[Site \"?\"]").unwrap_err();
    assert_eq!(err, Error::MissingPlayersAndMoves);
  }

  // ── Field extraction ────────────────────────────────────────────────────

  #[test]
  fn header_keys_are_lower_cased_and_escapes_undone() {
    let game = parse_block(
      "[WhiteElo \"1850\"]\n[Annotator \"say \\\"hi\\\"\"]\n[White \"a\"]\n1. e4 *",
    )
    .unwrap();
    assert_eq!(game.white_elo(), Some(1850));
    assert_eq!(game.header("annotator"), Some("say \"hi\""));
    assert_eq!(game.header("ANNOTATOR"), Some("say \"hi\""));
  }

  #[test]
  fn comments_variations_and_annotations_are_stripped() {
    let game = parse_block(
      "[White \"a\"]\n[Black \"b\"]\n\n\
       1. e4! {best by test} e5?! 2. Nf3 (2. f4 exf4 (2... d5)) Nc6 $1 ; trailing note\n\
       3. Bb5 a6 1-0",
    )
    .unwrap();
    assert_eq!(game.moves, "1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0");
    assert_eq!(game.result, "1-0");
  }

  #[test]
  fn versus_line_supplies_missing_names() {
    let game = parse_block("Kasparov vs. Topalov\n1. e4 d6 2. d4 Nf6 1-0").unwrap();
    assert_eq!(game.white, "Kasparov");
    assert_eq!(game.black, "Topalov");
    assert_eq!(game.moves, "1. e4 d6 2. d4 Nf6 1-0");

    let game = parse_block("[Event \"Anand vs Carlsen\"]\n1. d4 Nf6 *").unwrap();
    assert_eq!(game.white, "Anand");
    assert_eq!(game.black, "Carlsen");
  }

  #[test]
  fn partial_dates_do_not_resolve() {
    assert_eq!(parse_pgn_date("2023.??.??"), None);
    assert_eq!(parse_pgn_date("2023.07.14"), NaiveDate::from_ymd_opt(2023, 7, 14));
  }

  #[test]
  fn opening_falls_back_to_eco() {
    let game = parse_block("[ECO \"B90\"]\n[White \"a\"]\n1. e4 c5 *").unwrap();
    assert_eq!(game.opening(), Some("B90"));
  }
}
