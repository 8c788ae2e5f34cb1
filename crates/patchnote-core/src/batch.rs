//! Batch runs across many products.
//!
//! [`BatchCoordinator::run_batch`] is the single entry point used by the CLI
//! and the HTTP trigger. Per-product failures are collected into the
//! [`BatchReport`]; only invalid configuration, or a store that cannot list
//! products at all, aborts a batch.
//!
//! Products run concurrently up to the configured bound. Runs for the same
//! product are serialized by an in-process lock; across processes the store's
//! atomic commit decides.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard},
  time::Instant,
};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt as _};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  error::{BatchError, IngestError},
  fingerprint::Fingerprint,
  metrics::{BatchMetrics, MetricsSnapshot},
  pipeline::{IngestOutcome, IngestionPipeline},
  product::TrackedProduct,
  source::ChangelogSource,
  store::UpdateStore,
  summary::Summarizer,
};

// ─── Selection ───────────────────────────────────────────────────────────────

/// Which products a batch covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "slugs", rename_all = "snake_case")]
pub enum ProductSelector {
  /// Every product whose status is `active`.
  AllActive,
  /// Exactly these slugs, whatever their status. Unknown slugs are reported
  /// as `not-found`.
  Slugs(Vec<String>),
}

impl ProductSelector {
  /// An empty list means "all active".
  pub fn from_slugs(slugs: Vec<String>) -> Self {
    if slugs.is_empty() { Self::AllActive } else { Self::Slugs(slugs) }
  }
}

enum Selected {
  Found(TrackedProduct),
  Missing(String),
  LookupFailed { slug: String, error: String },
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OutcomeKind {
  Accepted,
  SkippedDuplicate,
  SkippedDailyLimit,
  Failed,
  NotFound,
}

/// One line of a batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResult {
  pub product_slug: String,
  pub outcome:      OutcomeKind,
  pub detail:       String,
  pub fingerprint:  Option<Fingerprint>,
  /// Set for `accepted`.
  pub record_id:    Option<Uuid>,
  /// Whether the next scheduled batch may succeed where this one failed.
  pub retryable:    bool,
}

impl ProductResult {
  fn from_outcome(slug: &str, outcome: &IngestOutcome) -> Self {
    Self {
      product_slug: slug.to_owned(),
      outcome:      outcome.kind(),
      detail:       outcome.detail(),
      fingerprint:  outcome.fingerprint().cloned(),
      record_id:    match outcome {
        IngestOutcome::Accepted { record, .. } => Some(record.record_id),
        _ => None,
      },
      retryable:    matches!(outcome, IngestOutcome::Failed(e) if e.is_retryable()),
    }
  }

  fn not_found(slug: String) -> Self {
    Self {
      detail:       format!("no tracked product with slug {slug:?}"),
      product_slug: slug,
      outcome:      OutcomeKind::NotFound,
      fingerprint:  None,
      record_id:    None,
      retryable:    false,
    }
  }

  fn failed(slug: String, error: IngestError) -> Self {
    Self {
      product_slug: slug,
      outcome:      OutcomeKind::Failed,
      detail:       error.to_string(),
      fingerprint:  None,
      record_id:    None,
      retryable:    error.is_retryable(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
  pub accepted:            usize,
  pub skipped_duplicate:   usize,
  pub skipped_daily_limit: usize,
  pub failed:              usize,
  pub not_found:           usize,
}

impl OutcomeCounts {
  pub fn get(&self, kind: OutcomeKind) -> usize {
    match kind {
      OutcomeKind::Accepted => self.accepted,
      OutcomeKind::SkippedDuplicate => self.skipped_duplicate,
      OutcomeKind::SkippedDailyLimit => self.skipped_daily_limit,
      OutcomeKind::Failed => self.failed,
      OutcomeKind::NotFound => self.not_found,
    }
  }

  fn add(&mut self, kind: OutcomeKind) {
    let slot = match kind {
      OutcomeKind::Accepted => &mut self.accepted,
      OutcomeKind::SkippedDuplicate => &mut self.skipped_duplicate,
      OutcomeKind::SkippedDailyLimit => &mut self.skipped_daily_limit,
      OutcomeKind::Failed => &mut self.failed,
      OutcomeKind::NotFound => &mut self.not_found,
    };
    *slot += 1;
  }
}

/// The externally observable result of a batch run. Always complete, even
/// when every product failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
  pub started_at:     DateTime<Utc>,
  pub total_selected: usize,
  pub counts:         OutcomeCounts,
  /// In selection order.
  pub results:        Vec<ProductResult>,
  pub duration_ms:    u64,
  /// Set when cancellation left some selected products unprocessed.
  pub cancelled:      bool,
  pub not_started:    usize,
  pub metrics:        MetricsSnapshot,
}

impl BatchReport {
  pub fn result_for(&self, slug: &str) -> Option<&ProductResult> {
    self.results.iter().find(|r| r.product_slug == slug)
  }
}

// ─── Per-product locks ───────────────────────────────────────────────────────

type ProductLock = Arc<tokio::sync::Mutex<()>>;

/// One async lock per product, present only while a run holds or awaits it.
#[derive(Default)]
struct ProductLocks(Mutex<HashMap<String, ProductLock>>);

impl ProductLocks {
  fn map(&self) -> MutexGuard<'_, HashMap<String, ProductLock>> {
    match self.0.lock() {
      Ok(map) => map,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn handle(&self, slug: &str) -> ProductLock {
    self.map().entry(slug.to_owned()).or_default().clone()
  }

  /// Give back a handle from [`Self::handle`]; the entry goes once the map
  /// holds the last reference.
  fn release(&self, slug: &str, handle: ProductLock) {
    let mut map = self.map();
    drop(handle);
    if map.get(slug).is_some_and(|lock| Arc::strong_count(lock) == 1) {
      map.remove(slug);
    }
  }

  fn len(&self) -> usize { self.map().len() }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct BatchCoordinator<S, F, Z> {
  pipeline:    Arc<IngestionPipeline<S, F, Z>>,
  concurrency: usize,
  locks:       ProductLocks,
}

impl<S, F, Z> BatchCoordinator<S, F, Z>
where
  S: UpdateStore,
  F: ChangelogSource,
  Z: Summarizer,
{
  pub fn new(pipeline: Arc<IngestionPipeline<S, F, Z>>, concurrency: usize) -> Self {
    Self { pipeline, concurrency, locks: ProductLocks::default() }
  }

  pub fn pipeline(&self) -> &Arc<IngestionPipeline<S, F, Z>> { &self.pipeline }

  /// Products with a run in flight or waiting.
  pub fn products_in_flight(&self) -> usize { self.locks.len() }

  /// Run the pipeline for every selected product and report on each.
  ///
  /// `cancel` is checked before each product starts; products already in
  /// flight run to their terminal state.
  pub async fn run_batch(
    &self,
    selector: &ProductSelector,
    cancel: &CancellationToken,
  ) -> Result<BatchReport, BatchError> {
    if self.concurrency == 0 {
      return Err(BatchError::InvalidConfig("concurrency must be at least 1".into()));
    }
    self.pipeline.config().validate()?;

    let started_at = self.pipeline.clock().now();
    let timer = Instant::now();
    let selected = self.select(selector).await?;
    let total_selected = selected.len();
    let metrics = BatchMetrics::new();
    info!(products = total_selected, concurrency = self.concurrency, "batch started");

    let metrics_ref = &metrics;
    let mut indexed: Vec<(usize, ProductResult)> = stream::iter(selected.into_iter().enumerate())
      .map(move |(index, item)| async move {
        if cancel.is_cancelled() {
          return None;
        }
        Some((index, self.run_one(item, metrics_ref).await))
      })
      .buffer_unordered(self.concurrency)
      .filter_map(futures::future::ready)
      .collect()
      .await;
    indexed.sort_by_key(|(index, _)| *index);

    let results: Vec<ProductResult> = indexed.into_iter().map(|(_, r)| r).collect();
    let mut counts = OutcomeCounts::default();
    for result in &results {
      counts.add(result.outcome);
    }
    let not_started = total_selected - results.len();
    if not_started > 0 {
      warn!(not_started, "batch cancelled before every product ran");
    }

    let report = BatchReport {
      started_at,
      total_selected,
      counts,
      results,
      duration_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
      cancelled: not_started > 0,
      not_started,
      metrics: metrics.snapshot(),
    };
    info!(
      accepted = counts.accepted,
      skipped_duplicate = counts.skipped_duplicate,
      skipped_daily_limit = counts.skipped_daily_limit,
      failed = counts.failed,
      not_found = counts.not_found,
      duration_ms = report.duration_ms,
      "batch finished"
    );
    Ok(report)
  }

  async fn select(&self, selector: &ProductSelector) -> Result<Vec<Selected>, BatchError> {
    let store = self.pipeline.store();
    match selector {
      ProductSelector::AllActive => Ok(
        store
          .list_products(true)
          .await
          .map_err(|e| BatchError::Store(Box::new(e)))?
          .into_iter()
          .map(Selected::Found)
          .collect(),
      ),
      ProductSelector::Slugs(slugs) => {
        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(slugs.len());
        for slug in slugs.iter().map(|s| s.trim()) {
          if !seen.insert(slug.to_owned()) {
            continue;
          }
          selected.push(match store.get_product(slug).await {
            Ok(Some(product)) => Selected::Found(product),
            Ok(None) => Selected::Missing(slug.to_owned()),
            Err(e) => Selected::LookupFailed { slug: slug.to_owned(), error: e.to_string() },
          });
        }
        Ok(selected)
      }
    }
  }

  async fn run_one(&self, item: Selected, metrics: &BatchMetrics) -> ProductResult {
    match item {
      Selected::Missing(slug) => {
        warn!(product = %slug, "unknown product");
        ProductResult::not_found(slug)
      }
      Selected::LookupFailed { slug, error } => {
        warn!(product = %slug, %error, "product lookup failed");
        ProductResult::failed(slug, IngestError::LedgerUnavailable(error))
      }
      Selected::Found(product) => {
        let lock = self.locks.handle(&product.slug);
        let outcome = {
          let _guard = lock.lock().await;
          self.pipeline.run(&product, metrics).await
        };
        self.locks.release(&product.slug, lock);
        ProductResult::from_outcome(&product.slug, &outcome)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lock_entries_go_when_the_last_holder_releases() {
    let locks = ProductLocks::default();
    let first = locks.handle("cursor");
    let second = locks.handle("cursor");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(locks.len(), 1);

    locks.release("cursor", first);
    assert_eq!(locks.len(), 1);
    locks.release("cursor", second);
    assert_eq!(locks.len(), 0);

    // A fresh handle after release is a new lock.
    let again = locks.handle("cursor");
    locks.release("cursor", again);
    assert_eq!(locks.len(), 0);
  }
}
