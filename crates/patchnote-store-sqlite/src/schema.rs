//! SQL schema for the patchnote SQLite store.
//!
//! Executed once at connection startup; `PRAGMA user_version` records the
//! schema revision.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS products (
    slug               TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    homepage           TEXT,
    changelog_url      TEXT,
    status             TEXT NOT NULL DEFAULT 'active',   -- 'active' | 'inactive'
    last_crawl_at      TEXT,
    last_crawl_outcome TEXT,                              -- 'success' | 'failure'
    last_crawl_error   TEXT,
    created_at         TEXT NOT NULL
);

-- Append-only. Rows are only ever written by the commit transaction.
CREATE TABLE IF NOT EXISTS update_records (
    record_id     TEXT PRIMARY KEY,
    product_slug  TEXT NOT NULL REFERENCES products(slug),
    title         TEXT NOT NULL,
    summary       TEXT,
    key_points    TEXT,              -- JSON array or NULL
    importance    TEXT NOT NULL,     -- 'low' | 'medium' | 'high'
    tags          TEXT NOT NULL DEFAULT '[]',
    version       TEXT,
    published_at  TEXT NOT NULL,     -- RFC 3339 UTC, microsecond precision
    fingerprint   TEXT NOT NULL,
    source_url    TEXT,
    confidence    REAL NOT NULL,
    ingested_at   TEXT NOT NULL,
    ingest_day    TEXT NOT NULL,     -- YYYY-MM-DD, UTC
    UNIQUE (product_slug, fingerprint)
);

-- Derived from update_records; can be dropped and rebuilt at any time.
CREATE TABLE IF NOT EXISTS ledger (
    product_slug TEXT NOT NULL,
    fingerprint  TEXT NOT NULL,
    day          TEXT NOT NULL,
    recorded_at  TEXT NOT NULL,
    PRIMARY KEY (product_slug, fingerprint)
);

CREATE INDEX IF NOT EXISTS ledger_day_idx ON ledger(product_slug, day);
CREATE INDEX IF NOT EXISTS records_display_idx
    ON update_records(product_slug, published_at DESC, ingested_at DESC);

PRAGMA user_version = 1;
";
