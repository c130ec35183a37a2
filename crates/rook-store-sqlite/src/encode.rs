//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates `YYYY-MM-DD`, enums their
//! snake_case names.

use chrono::{DateTime, NaiveDate, Utc};
use rook_core::{cursor::SyncCursor, game::SourceName};

use crate::{Error, Result};

// ─── DateTime<Utc>
// ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

// ─── SourceName ──────────────────────────────────────────────────────────────

pub fn encode_source(s: SourceName) -> String { s.to_string() }

pub fn decode_source(s: &str) -> Result<SourceName> { Ok(SourceName::parse(s)?) }

// ─── Raw row types ───────────────────────────────────────────────────────────

/// A `sync_cursors` row exactly as read from SQLite.
pub struct RawCursor {
  pub source:           String,
  pub identity:         String,
  pub last_imported_at: i64,
  pub last_external_id: Option<String>,
  pub total_imported:   i64,
  pub updated_at:       String,
}

impl RawCursor {
  pub const COLUMNS: &'static str = "source, identity, last_imported_at, \
                                     last_external_id, total_imported, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source:           row.get(0)?,
      identity:         row.get(1)?,
      last_imported_at: row.get(2)?,
      last_external_id: row.get(3)?,
      total_imported:   row.get(4)?,
      updated_at:       row.get(5)?,
    })
  }

  pub fn into_cursor(self) -> Result<SyncCursor> {
    Ok(SyncCursor {
      source:           decode_source(&self.source)?,
      identity:         self.identity,
      last_imported_at: self.last_imported_at,
      last_external_id: self.last_external_id,
      total_imported:   u64::try_from(self.total_imported).unwrap_or(0),
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}
