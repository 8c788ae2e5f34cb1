//! The `UpdateStore` trait: products, records and the freshness ledger.
//!
//! Implemented by storage backends (`patchnote-store-sqlite`, and
//! [`crate::memory::MemoryStore`] for tests). The pipeline and the batch
//! coordinator depend on this abstraction, not on a concrete backend.
//!
//! The store is the only shared mutable resource. Update records and ledger
//! entries are written exclusively through [`UpdateStore::commit_update`],
//! which must check the ledger and insert as one atomic step.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  fingerprint::Fingerprint,
  product::{LastCrawl, NewProduct, ProductStatus, TrackedProduct},
  record::{NewUpdateRecord, UpdateRecord},
};

// ─── Commit outcome ──────────────────────────────────────────────────────────

/// Result of an atomic check-and-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
  /// The record and its ledger entry were written together.
  Inserted(UpdateRecord),
  /// Another writer already recorded this fingerprint for the product.
  DuplicateFingerprint,
  /// Another writer already recorded an update for the product on this day.
  DailyLimitReached,
  /// Another writer held the write lock past the busy timeout and the ledger
  /// shows neither conflict yet. Nothing was written.
  Busy,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a patchnote storage backend.
///
/// All methods return `Send` futures so the trait can be driven from a
/// multi-threaded tokio runtime.
pub trait UpdateStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Products ──────────────────────────────────────────────────────────

  /// Create a product, or refresh the descriptive fields of an existing one.
  /// Last-crawl metadata and the creation timestamp are preserved.
  fn upsert_product(
    &self,
    input: NewProduct,
  ) -> impl Future<Output = Result<TrackedProduct, Self::Error>> + Send + '_;

  /// Retrieve a product by slug. Returns `None` if not found.
  fn get_product<'a>(
    &'a self,
    slug: &'a str,
  ) -> impl Future<Output = Result<Option<TrackedProduct>, Self::Error>> + Send + 'a;

  /// List products ordered by slug, optionally only the active ones.
  fn list_products(
    &self,
    active_only: bool,
  ) -> impl Future<Output = Result<Vec<TrackedProduct>, Self::Error>> + Send + '_;

  /// Change a product's lifecycle status. Records are never touched.
  /// Returns `false` if the product does not exist.
  fn set_product_status<'a>(
    &'a self,
    slug: &'a str,
    status: ProductStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Overwrite a product's last-crawl metadata.
  fn record_crawl<'a>(
    &'a self,
    slug: &'a str,
    crawl: LastCrawl,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Ledger lookups ────────────────────────────────────────────────────

  /// Exact-duplicate check across all time.
  fn has_fingerprint<'a>(
    &'a self,
    slug: &'a str,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Whether any update was accepted for the product on `day` (UTC).
  fn has_any_on_day<'a>(
    &'a self,
    slug: &'a str,
    day: NaiveDate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// The most recently recorded fingerprint for the product.
  fn latest_fingerprint<'a>(
    &'a self,
    slug: &'a str,
  ) -> impl Future<Output = Result<Option<Fingerprint>, Self::Error>> + Send + 'a;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Atomically: if neither the fingerprint nor the record's ledger day is
  /// already present for the product, insert the record and its ledger
  /// entry. Losing a race is reported through [`CommitOutcome`], not as an
  /// error. A backend that cannot take its write lock re-checks the ledger
  /// and answers with the matching skip, or [`CommitOutcome::Busy`].
  fn commit_update(
    &self,
    record: NewUpdateRecord,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;

  /// Discard the ledger and rebuild it from persisted records. Returns the
  /// number of ledger entries afterwards.
  fn rebuild_ledger(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Most recent records for a product in display order: publish timestamp
  /// descending, then ingestion timestamp descending.
  fn recent_updates<'a>(
    &'a self,
    slug: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<UpdateRecord>, Self::Error>> + Send + 'a;

  /// Number of records stored for a product.
  fn count_updates<'a>(
    &'a self,
    slug: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;
}
