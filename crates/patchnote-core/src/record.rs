//! Update records: the persisted, accepted updates.
//!
//! Records are append-only. For a given product no two records share a
//! fingerprint; the store's ledger enforces that, not incidental database
//! constraints.

use std::{cmp::Ordering, collections::BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

// ─── Importance ──────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Importance {
  Low,
  /// Used when the summarizer does not supply a level.
  #[default]
  Medium,
  High,
}

// ─── Confidence ──────────────────────────────────────────────────────────────

/// Clamp a confidence score into `[0.0, 1.0]`.
///
/// Out-of-range values are clamped rather than rejected; a non-finite value
/// falls back to `default` (itself clamped).
pub fn clamp_confidence(value: f64, default: f64) -> f64 {
  let value = if value.is_finite() { value } else { default };
  if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A persisted update. Field names are a stable contract with the store and
/// downstream reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
  pub record_id:    Uuid,
  pub product_slug: String,
  pub title:        String,
  /// `None` when the summarizer was unavailable.
  pub summary:      Option<String>,
  pub key_points:   Option<Vec<String>>,
  pub importance:   Importance,
  pub tags:         BTreeSet<String>,
  pub version:      Option<String>,
  pub published_at: DateTime<Utc>,
  pub fingerprint:  Fingerprint,
  pub source_url:   Option<String>,
  /// Always within `[0.0, 1.0]`.
  pub confidence:   f64,
  /// Server-assigned; also decides the record's ledger day.
  pub ingested_at:  DateTime<Utc>,
}

impl UpdateRecord {
  /// The UTC calendar day under which the ledger files this record.
  pub fn ledger_day(&self) -> NaiveDate { self.ingested_at.date_naive() }

  /// Display order: publish timestamp descending, ties broken by ingestion
  /// timestamp descending.
  pub fn display_cmp(a: &Self, b: &Self) -> Ordering {
    b.published_at
      .cmp(&a.published_at)
      .then_with(|| b.ingested_at.cmp(&a.ingested_at))
  }
}

// ─── NewUpdateRecord ─────────────────────────────────────────────────────────

/// Input to [`crate::store::UpdateStore::commit_update`]. The store assigns
/// `record_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpdateRecord {
  pub product_slug: String,
  pub title:        String,
  pub summary:      Option<String>,
  pub key_points:   Option<Vec<String>>,
  pub importance:   Importance,
  pub tags:         BTreeSet<String>,
  pub version:      Option<String>,
  pub published_at: DateTime<Utc>,
  pub fingerprint:  Fingerprint,
  pub source_url:   Option<String>,
  pub confidence:   f64,
  pub ingested_at:  DateTime<Utc>,
}

impl NewUpdateRecord {
  pub fn ledger_day(&self) -> NaiveDate { self.ingested_at.date_naive() }

  pub fn into_record(self, record_id: Uuid) -> UpdateRecord {
    UpdateRecord {
      record_id,
      product_slug: self.product_slug,
      title:        self.title,
      summary:      self.summary,
      key_points:   self.key_points,
      importance:   self.importance,
      tags:         self.tags,
      version:      self.version,
      published_at: self.published_at,
      fingerprint:  self.fingerprint,
      source_url:   self.source_url,
      confidence:   self.confidence,
      ingested_at:  self.ingested_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn confidence_is_clamped_not_rejected() {
    assert_eq!(clamp_confidence(1.7, 0.5), 1.0);
    assert_eq!(clamp_confidence(-0.2, 0.5), 0.0);
    assert_eq!(clamp_confidence(0.42, 0.5), 0.42);
    assert_eq!(clamp_confidence(f64::NAN, 0.5), 0.5);
    assert_eq!(clamp_confidence(f64::NAN, f64::INFINITY), 0.0);
  }

  #[test]
  fn importance_defaults_to_medium() {
    assert_eq!(Importance::default(), Importance::Medium);
    assert_eq!("high".parse::<Importance>().unwrap(), Importance::High);
  }
}
