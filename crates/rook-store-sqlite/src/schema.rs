//! SQL schema for the rook SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS players (
    player_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    player_hash TEXT NOT NULL UNIQUE,  -- sha256(source:lower(username))
    source      TEXT NOT NULL,
    username    TEXT NOT NULL,
    rating      INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- (source, external_id) is the dedup key. The importer checks it before
-- writing; this constraint catches races between that check and the insert.
CREATE TABLE IF NOT EXISTS games (
    game_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id    INTEGER NOT NULL REFERENCES players(player_id),
    source       TEXT NOT NULL,
    external_id  TEXT NOT NULL,
    played_on    TEXT NOT NULL,     -- YYYY-MM-DD
    result       TEXT NOT NULL,     -- 'win' | 'loss' | 'draw' | 'unknown'
    rating       INTEGER NOT NULL,
    time_control TEXT NOT NULL,
    opening      TEXT,
    occurred_at  INTEGER NOT NULL,  -- unix seconds
    pgn          TEXT NOT NULL,
    imported_at  TEXT NOT NULL,
    UNIQUE (source, external_id)
);

CREATE TABLE IF NOT EXISTS scores (
    game_id          INTEGER PRIMARY KEY REFERENCES games(game_id),
    engine_match_pct REAL NOT NULL,
    delta_cp         REAL NOT NULL,
    run_perfect      INTEGER NOT NULL,
    ml_prob          REAL NOT NULL,
    suspicion_level  REAL NOT NULL,
    scored_at        TEXT NOT NULL
);

-- Only ever written through the compare-and-upsert in `advance_cursor`.
CREATE TABLE IF NOT EXISTS sync_cursors (
    source           TEXT NOT NULL,
    identity         TEXT NOT NULL,
    last_imported_at INTEGER NOT NULL,
    last_external_id TEXT,
    total_imported   INTEGER NOT NULL DEFAULT 0,
    updated_at       TEXT NOT NULL,
    PRIMARY KEY (source, identity)
);

CREATE INDEX IF NOT EXISTS games_player_idx   ON games(player_id);
CREATE INDEX IF NOT EXISTS games_occurred_idx ON games(source, occurred_at);

PRAGMA user_version = 1;
";
