//! The freshness ledger: what has already been ingested, per product.
//!
//! For every product the ledger maps a UTC calendar day to the fingerprints
//! accepted that day, and remembers the most recent fingerprint overall. It
//! is derived state: [`FreshnessLedger::rebuild`] reconstructs it entirely
//! from persisted [`UpdateRecord`]s.
//!
//! The ledger answers the two questions that gate every write:
//!
//! - has this exact content been recorded before, on any day?
//! - has anything at all been accepted for this product today?
//!
//! [`FreshnessLedger::record`] checks and appends in one `&mut` call, so a
//! caller holding the ledger behind a lock gets check-and-record atomically.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{fingerprint::Fingerprint, record::UpdateRecord};

// ─── Verdict ─────────────────────────────────────────────────────────────────

/// The ledger's answer for a (product, fingerprint, day) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerVerdict {
  /// Neither the fingerprint nor the day has been seen.
  Fresh,
  /// The fingerprint was recorded before (on any day).
  Duplicate,
  /// The fingerprint is new but the day already has an accepted update.
  DailyLimitReached,
}

// ─── Per-product entry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct ProductLedger {
  days:   BTreeMap<NaiveDate, BTreeSet<Fingerprint>>,
  seen:   HashSet<Fingerprint>,
  latest: Option<(DateTime<Utc>, Fingerprint)>,
}

impl ProductLedger {
  fn verdict(&self, fingerprint: &Fingerprint, day: NaiveDate) -> LedgerVerdict {
    if self.seen.contains(fingerprint) {
      LedgerVerdict::Duplicate
    } else if self.days.get(&day).is_some_and(|fps| !fps.is_empty()) {
      LedgerVerdict::DailyLimitReached
    } else {
      LedgerVerdict::Fresh
    }
  }

  fn insert(&mut self, fingerprint: Fingerprint, day: NaiveDate, at: DateTime<Utc>) {
    let newer = self.latest.as_ref().is_none_or(|(latest_at, _)| at >= *latest_at);
    if newer {
      self.latest = Some((at, fingerprint.clone()));
    }
    self.days.entry(day).or_default().insert(fingerprint.clone());
    self.seen.insert(fingerprint);
  }
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// In-memory freshness ledger for any number of products. Append-only.
#[derive(Debug, Clone, Default)]
pub struct FreshnessLedger {
  products: HashMap<String, ProductLedger>,
}

impl FreshnessLedger {
  pub fn new() -> Self { Self::default() }

  /// Reconstruct the ledger from persisted records.
  pub fn rebuild<'a>(records: impl IntoIterator<Item = &'a UpdateRecord>) -> Self {
    let mut ledger = Self::new();
    for record in records {
      ledger
        .products
        .entry(record.product_slug.clone())
        .or_default()
        .insert(record.fingerprint.clone(), record.ledger_day(), record.ingested_at);
    }
    ledger
  }

  /// Exact-duplicate check across all time.
  pub fn has_fingerprint(&self, product: &str, fingerprint: &Fingerprint) -> bool {
    self
      .products
      .get(product)
      .is_some_and(|p| p.seen.contains(fingerprint))
  }

  /// Whether anything was accepted for `product` on `day`.
  pub fn has_any_on_day(&self, product: &str, day: NaiveDate) -> bool {
    self
      .products
      .get(product)
      .and_then(|p| p.days.get(&day))
      .is_some_and(|fps| !fps.is_empty())
  }

  /// The most recently recorded fingerprint for `product`.
  pub fn latest_fingerprint(&self, product: &str) -> Option<&Fingerprint> {
    self
      .products
      .get(product)
      .and_then(|p| p.latest.as_ref())
      .map(|(_, fp)| fp)
  }

  /// Fingerprints accepted for `product` on `day`, in sorted order.
  pub fn fingerprints_on(&self, product: &str, day: NaiveDate) -> Vec<Fingerprint> {
    self
      .products
      .get(product)
      .and_then(|p| p.days.get(&day))
      .map(|fps| fps.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// What [`Self::record`] would decide, without recording.
  pub fn check(&self, product: &str, fingerprint: &Fingerprint, day: NaiveDate) -> LedgerVerdict {
    self
      .products
      .get(product)
      .map_or(LedgerVerdict::Fresh, |p| p.verdict(fingerprint, day))
  }

  /// Check and append in one step. Only a [`LedgerVerdict::Fresh`] verdict
  /// records anything.
  pub fn record(
    &mut self,
    product: &str,
    fingerprint: &Fingerprint,
    day: NaiveDate,
    at: DateTime<Utc>,
  ) -> LedgerVerdict {
    let entry = self.products.entry(product.to_owned()).or_default();
    let verdict = entry.verdict(fingerprint, day);
    if verdict == LedgerVerdict::Fresh {
      entry.insert(fingerprint.clone(), day, at);
    }
    verdict
  }

  /// Total number of fingerprints across all products.
  pub fn len(&self) -> usize { self.products.values().map(|p| p.seen.len()).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::TimeZone;
  use uuid::Uuid;

  use super::*;
  use crate::{
    candidate::UpdateCandidate,
    fingerprint::Fingerprinter,
    record::Importance,
  };

  fn fp(body: &str) -> Fingerprint {
    Fingerprinter::default()
      .fingerprint_candidate("cursor", &UpdateCandidate::new("Cursor", body))
      .unwrap()
      .1
  }

  fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2025, 7, d).unwrap() }

  fn at(d: u32, h: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 7, d, h, 0, 0).unwrap() }

  #[test]
  fn fresh_then_duplicate() {
    let mut ledger = FreshnessLedger::new();
    let f1 = fp("one");

    assert_eq!(ledger.record("cursor", &f1, day(3), at(3, 9)), LedgerVerdict::Fresh);
    assert!(ledger.has_fingerprint("cursor", &f1));
    assert_eq!(ledger.record("cursor", &f1, day(3), at(3, 10)), LedgerVerdict::Duplicate);
    // A duplicate is a duplicate on any later day too.
    assert_eq!(ledger.check("cursor", &f1, day(9)), LedgerVerdict::Duplicate);
  }

  #[test]
  fn second_fingerprint_same_day_hits_daily_limit() {
    let mut ledger = FreshnessLedger::new();
    ledger.record("cursor", &fp("one"), day(3), at(3, 9));

    let verdict = ledger.record("cursor", &fp("two"), day(3), at(3, 18));
    assert_eq!(verdict, LedgerVerdict::DailyLimitReached);
    assert_eq!(ledger.fingerprints_on("cursor", day(3)).len(), 1);
    assert_eq!(ledger.record("cursor", &fp("two"), day(4), at(4, 9)), LedgerVerdict::Fresh);
  }

  #[test]
  fn products_are_independent() {
    let mut ledger = FreshnessLedger::new();
    let f1 = fp("one");
    ledger.record("cursor", &f1, day(3), at(3, 9));

    assert!(!ledger.has_fingerprint("windsurf", &f1));
    assert!(!ledger.has_any_on_day("windsurf", day(3)));
    assert_eq!(ledger.record("windsurf", &f1, day(3), at(3, 9)), LedgerVerdict::Fresh);
  }

  #[test]
  fn latest_tracks_most_recent_recording() {
    let mut ledger = FreshnessLedger::new();
    assert!(ledger.latest_fingerprint("cursor").is_none());

    ledger.record("cursor", &fp("one"), day(3), at(3, 9));
    ledger.record("cursor", &fp("two"), day(4), at(4, 9));
    assert_eq!(ledger.latest_fingerprint("cursor"), Some(&fp("two")));
  }

  #[test]
  fn rebuild_matches_incremental_recording() {
    let record = |body: &str, d: u32| UpdateRecord {
      record_id:    Uuid::new_v4(),
      product_slug: "cursor".into(),
      title:        "Cursor".into(),
      summary:      None,
      key_points:   None,
      importance:   Importance::Medium,
      tags:         BTreeSet::new(),
      version:      None,
      published_at: at(d, 8),
      fingerprint:  fp(body),
      source_url:   None,
      confidence:   0.5,
      ingested_at:  at(d, 9),
    };
    // Out of order on purpose: latest is decided by ingestion time.
    let records = vec![record("two", 4), record("one", 3)];

    let ledger = FreshnessLedger::rebuild(&records);
    assert_eq!(ledger.len(), 2);
    assert!(ledger.has_any_on_day("cursor", day(3)));
    assert!(ledger.has_any_on_day("cursor", day(4)));
    assert!(!ledger.has_any_on_day("cursor", day(5)));
    assert_eq!(ledger.latest_fingerprint("cursor"), Some(&fp("two")));
  }
}
