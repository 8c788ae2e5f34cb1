//! [`MemoryStore`]: an in-process [`UpdateStore`] built on the
//! [`FreshnessLedger`].
//!
//! Products, records and the ledger share one mutex, which makes
//! [`UpdateStore::commit_update`] atomic. Used by tests and dry runs; the
//! fault switches let tests simulate a cold backing store, a failing write or
//! a contended write lock.

use std::{
  collections::BTreeMap,
  sync::{
    Mutex,
    MutexGuard,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  Error,
  Result,
  fingerprint::Fingerprint,
  ledger::{FreshnessLedger, LedgerVerdict},
  product::{LastCrawl, NewProduct, ProductStatus, TrackedProduct},
  record::{NewUpdateRecord, UpdateRecord},
  store::{CommitOutcome, UpdateStore},
};

#[derive(Debug, Default)]
struct Inner {
  products: BTreeMap<String, TrackedProduct>,
  records:  Vec<UpdateRecord>,
  ledger:   FreshnessLedger,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  inner:             Mutex<Inner>,
  reads_unavailable: AtomicBool,
  commits_failing:   AtomicBool,
  write_lock_held:   AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Make every ledger lookup fail with [`Error::StoreUnavailable`].
  pub fn set_reads_unavailable(&self, unavailable: bool) {
    self.reads_unavailable.store(unavailable, Ordering::SeqCst);
  }

  /// Make every [`UpdateStore::commit_update`] fail with
  /// [`Error::WriteFailed`].
  pub fn set_commits_failing(&self, failing: bool) {
    self.commits_failing.store(failing, Ordering::SeqCst);
  }

  /// Act as if another writer holds the write lock: commits only re-check
  /// the ledger and never insert.
  pub fn set_write_lock_held(&self, held: bool) {
    self.write_lock_held.store(held, Ordering::SeqCst);
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|_| Error::StoreUnavailable)
  }

  fn lock_for_lookup(&self) -> Result<MutexGuard<'_, Inner>> {
    if self.reads_unavailable.load(Ordering::SeqCst) {
      return Err(Error::StoreUnavailable);
    }
    self.lock()
  }
}

impl UpdateStore for MemoryStore {
  type Error = Error;

  // ── Products ──────────────────────────────────────────────────────────────

  async fn upsert_product(&self, input: NewProduct) -> Result<TrackedProduct> {
    input.validate()?;
    let mut inner = self.lock()?;
    let product = inner
      .products
      .entry(input.slug.clone())
      .and_modify(|p| {
        p.name = input.name.clone();
        p.homepage = input.homepage.clone();
        p.changelog_url = input.changelog_url.clone();
        p.status = input.status;
      })
      .or_insert_with(|| TrackedProduct {
        slug:          input.slug.clone(),
        name:          input.name.clone(),
        homepage:      input.homepage.clone(),
        changelog_url: input.changelog_url.clone(),
        status:        input.status,
        last_crawl:    None,
        created_at:    Utc::now(),
      });
    Ok(product.clone())
  }

  async fn get_product(&self, slug: &str) -> Result<Option<TrackedProduct>> {
    Ok(self.lock()?.products.get(slug).cloned())
  }

  async fn list_products(&self, active_only: bool) -> Result<Vec<TrackedProduct>> {
    Ok(
      self
        .lock()?
        .products
        .values()
        .filter(|p| !active_only || p.status.is_active())
        .cloned()
        .collect(),
    )
  }

  async fn set_product_status(&self, slug: &str, status: ProductStatus) -> Result<bool> {
    let mut inner = self.lock()?;
    Ok(match inner.products.get_mut(slug) {
      Some(p) => {
        p.status = status;
        true
      }
      None => false,
    })
  }

  async fn record_crawl(&self, slug: &str, crawl: LastCrawl) -> Result<()> {
    let mut inner = self.lock()?;
    let product = inner
      .products
      .get_mut(slug)
      .ok_or_else(|| Error::ProductNotFound(slug.to_owned()))?;
    product.last_crawl = Some(crawl);
    Ok(())
  }

  // ── Ledger lookups ────────────────────────────────────────────────────────

  async fn has_fingerprint(&self, slug: &str, fingerprint: &Fingerprint) -> Result<bool> {
    Ok(self.lock_for_lookup()?.ledger.has_fingerprint(slug, fingerprint))
  }

  async fn has_any_on_day(&self, slug: &str, day: NaiveDate) -> Result<bool> {
    Ok(self.lock_for_lookup()?.ledger.has_any_on_day(slug, day))
  }

  async fn latest_fingerprint(&self, slug: &str) -> Result<Option<Fingerprint>> {
    Ok(self.lock_for_lookup()?.ledger.latest_fingerprint(slug).cloned())
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn commit_update(&self, record: NewUpdateRecord) -> Result<CommitOutcome> {
    if self.commits_failing.load(Ordering::SeqCst) {
      return Err(Error::WriteFailed("commits disabled".into()));
    }

    let mut inner = self.lock()?;
    if !inner.products.contains_key(&record.product_slug) {
      return Err(Error::ProductNotFound(record.product_slug));
    }

    if self.write_lock_held.load(Ordering::SeqCst) {
      let day = record.ledger_day();
      return Ok(match inner.ledger.check(&record.product_slug, &record.fingerprint, day) {
        LedgerVerdict::Duplicate => CommitOutcome::DuplicateFingerprint,
        LedgerVerdict::DailyLimitReached => CommitOutcome::DailyLimitReached,
        LedgerVerdict::Fresh => CommitOutcome::Busy,
      });
    }

    let verdict = inner.ledger.record(
      &record.product_slug,
      &record.fingerprint,
      record.ledger_day(),
      record.ingested_at,
    );
    Ok(match verdict {
      LedgerVerdict::Fresh => {
        let stored = record.into_record(Uuid::new_v4());
        inner.records.push(stored.clone());
        CommitOutcome::Inserted(stored)
      }
      LedgerVerdict::Duplicate => CommitOutcome::DuplicateFingerprint,
      LedgerVerdict::DailyLimitReached => CommitOutcome::DailyLimitReached,
    })
  }

  async fn rebuild_ledger(&self) -> Result<usize> {
    let mut inner = self.lock()?;
    let rebuilt = FreshnessLedger::rebuild(&inner.records);
    inner.ledger = rebuilt;
    Ok(inner.ledger.len())
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn recent_updates(&self, slug: &str, limit: usize) -> Result<Vec<UpdateRecord>> {
    let inner = self.lock()?;
    let mut records: Vec<UpdateRecord> = inner
      .records
      .iter()
      .filter(|r| r.product_slug == slug)
      .cloned()
      .collect();
    records.sort_by(UpdateRecord::display_cmp);
    records.truncate(limit);
    Ok(records)
  }

  async fn count_updates(&self, slug: &str) -> Result<usize> {
    Ok(self.lock()?.records.iter().filter(|r| r.product_slug == slug).count())
  }
}
