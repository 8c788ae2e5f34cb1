//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings with a fixed microsecond precision and a
//! `Z` suffix, so lexical order equals chronological order. Days are
//! `YYYY-MM-DD`. Tags and key points are compact JSON arrays.

use std::{collections::BTreeSet, str::FromStr};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use patchnote_core::{
  fingerprint::Fingerprint,
  product::{CrawlOutcome, LastCrawl, ProductStatus, TrackedProduct},
  record::{Importance, UpdateRecord},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_day(day: NaiveDate) -> String { day.format("%Y-%m-%d").to_string() }

/// Parse a lowercase enum column through its `FromStr` impl.
fn decode_enum<T: FromStr>(column: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {column}: {s:?}")))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_tags(tags: &BTreeSet<String>) -> Result<String> { Ok(serde_json::to_string(tags)?) }

pub fn encode_key_points(points: Option<&Vec<String>>) -> Result<Option<String>> {
  points.map(serde_json::to_string).transpose().map_err(Error::from)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `products` row.
pub struct RawProduct {
  pub slug:               String,
  pub name:               String,
  pub homepage:           Option<String>,
  pub changelog_url:      Option<String>,
  pub status:             String,
  pub last_crawl_at:      Option<String>,
  pub last_crawl_outcome: Option<String>,
  pub last_crawl_error:   Option<String>,
  pub created_at:         String,
}

/// Column list matching [`RawProduct::from_row`].
pub const PRODUCT_COLUMNS: &str = "slug, name, homepage, changelog_url, status, \
                                   last_crawl_at, last_crawl_outcome, last_crawl_error, created_at";

impl RawProduct {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      slug:               row.get(0)?,
      name:               row.get(1)?,
      homepage:           row.get(2)?,
      changelog_url:      row.get(3)?,
      status:             row.get(4)?,
      last_crawl_at:      row.get(5)?,
      last_crawl_outcome: row.get(6)?,
      last_crawl_error:   row.get(7)?,
      created_at:         row.get(8)?,
    })
  }

  pub fn into_product(self) -> Result<TrackedProduct> {
    let last_crawl = match (self.last_crawl_at, self.last_crawl_outcome) {
      (Some(at), Some(outcome)) => Some(LastCrawl {
        at:      decode_dt(&at)?,
        outcome: decode_enum::<CrawlOutcome>("crawl outcome", &outcome)?,
        error:   self.last_crawl_error,
      }),
      _ => None,
    };

    Ok(TrackedProduct {
      slug: self.slug,
      name: self.name,
      homepage: self.homepage,
      changelog_url: self.changelog_url,
      status: decode_enum::<ProductStatus>("product status", &self.status)?,
      last_crawl,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `update_records` row.
pub struct RawRecord {
  pub record_id:    String,
  pub product_slug: String,
  pub title:        String,
  pub summary:      Option<String>,
  pub key_points:   Option<String>,
  pub importance:   String,
  pub tags:         String,
  pub version:      Option<String>,
  pub published_at: String,
  pub fingerprint:  String,
  pub source_url:   Option<String>,
  pub confidence:   f64,
  pub ingested_at:  String,
}

/// Column list matching [`RawRecord::from_row`].
pub const RECORD_COLUMNS: &str = "record_id, product_slug, title, summary, key_points, \
                                  importance, tags, version, published_at, fingerprint, \
                                  source_url, confidence, ingested_at";

impl RawRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:    row.get(0)?,
      product_slug: row.get(1)?,
      title:        row.get(2)?,
      summary:      row.get(3)?,
      key_points:   row.get(4)?,
      importance:   row.get(5)?,
      tags:         row.get(6)?,
      version:      row.get(7)?,
      published_at: row.get(8)?,
      fingerprint:  row.get(9)?,
      source_url:   row.get(10)?,
      confidence:   row.get(11)?,
      ingested_at:  row.get(12)?,
    })
  }

  pub fn into_record(self) -> Result<UpdateRecord> {
    let key_points = self
      .key_points
      .as_deref()
      .map(serde_json::from_str::<Vec<String>>)
      .transpose()?;

    Ok(UpdateRecord {
      record_id: decode_uuid(&self.record_id)?,
      product_slug: self.product_slug,
      title: self.title,
      summary: self.summary,
      key_points,
      importance: decode_enum::<Importance>("importance", &self.importance)?,
      tags: serde_json::from_str(&self.tags)?,
      version: self.version,
      published_at: decode_dt(&self.published_at)?,
      fingerprint: self.fingerprint.parse::<Fingerprint>()?,
      source_url: self.source_url,
      confidence: self.confidence,
      ingested_at: decode_dt(&self.ingested_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_chronologically() {
    let earlier = Utc.with_ymd_and_hms(2025, 7, 3, 9, 0, 0).unwrap();
    let later = earlier + chrono::Duration::microseconds(1500);
    assert!(encode_dt(earlier) < encode_dt(later));
    assert_eq!(encode_dt(earlier), "2025-07-03T09:00:00.000000Z");
    assert_eq!(decode_dt(&encode_dt(later)).unwrap(), later);
  }

  #[test]
  fn unknown_enum_values_are_rejected() {
    let err = decode_enum::<Importance>("importance", "urgent").unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
  }
}
