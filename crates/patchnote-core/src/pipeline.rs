//! The per-product ingestion state machine.
//!
//! ```text
//! Fetched → Normalized → Fingerprinted → Duplicate
//!                                      → DailyLimitReached
//!                                      → Accepted → Persisted → StatusUpdated
//! ```
//!
//! Every run ends in exactly one [`IngestOutcome`]. Errors are caught here and
//! carried in [`IngestOutcome::Failed`]; nothing propagates to the batch. A
//! run is strictly sequential and always reaches its terminal state, so a
//! cancelled batch never leaves a half-written product behind.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use strum::Display;
use tracing::{Instrument as _, debug, info, warn};

use crate::{
  Error,
  batch::OutcomeKind,
  candidate::UpdateCandidate,
  clock::Clock,
  error::{BatchError, IngestError},
  fingerprint::{Fingerprint, Fingerprinter, NormalizedCandidate},
  metrics::{BatchMetrics, Counter},
  product::{LastCrawl, TrackedProduct},
  record::{Importance, NewUpdateRecord, UpdateRecord, clamp_confidence},
  source::ChangelogSource,
  store::{CommitOutcome, UpdateStore},
  summary::{Summarizer, Summary},
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// Upper bound on a single changelog fetch.
  pub fetch_timeout:      Duration,
  /// Upper bound on a single summarizer call.
  pub summarize_timeout:  Duration,
  /// Confidence used when the summarizer supplies none.
  pub default_confidence: f64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      fetch_timeout:      Duration::from_secs(30),
      summarize_timeout:  Duration::from_secs(60),
      default_confidence: 0.5,
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), BatchError> {
    if self.fetch_timeout.is_zero() || self.summarize_timeout.is_zero() {
      return Err(BatchError::InvalidConfig("timeouts must be non-zero".into()));
    }
    if !(0.0..=1.0).contains(&self.default_confidence) {
      return Err(BatchError::InvalidConfig(format!(
        "default_confidence must be within [0, 1], got {}",
        self.default_confidence
      )));
    }
    Ok(())
  }
}

// ─── States and outcomes ─────────────────────────────────────────────────────

/// Pipeline states, as they appear in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Fetched,
  Normalized,
  Fingerprinted,
  Duplicate,
  DailyLimitReached,
  Accepted,
  Persisted,
  StatusUpdated,
}

/// Terminal result of one product's run.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
  Accepted {
    record:   UpdateRecord,
    /// The product's latest fingerprint before this record.
    previous: Option<Fingerprint>,
  },
  SkippedDuplicate {
    fingerprint: Fingerprint,
  },
  SkippedDailyLimit {
    fingerprint: Fingerprint,
    day:         NaiveDate,
  },
  Failed(IngestError),
}

impl IngestOutcome {
  pub fn kind(&self) -> OutcomeKind {
    match self {
      Self::Accepted { .. } => OutcomeKind::Accepted,
      Self::SkippedDuplicate { .. } => OutcomeKind::SkippedDuplicate,
      Self::SkippedDailyLimit { .. } => OutcomeKind::SkippedDailyLimit,
      Self::Failed(_) => OutcomeKind::Failed,
    }
  }

  pub fn fingerprint(&self) -> Option<&Fingerprint> {
    match self {
      Self::Accepted { record, .. } => Some(&record.fingerprint),
      Self::SkippedDuplicate { fingerprint } | Self::SkippedDailyLimit { fingerprint, .. } => {
        Some(fingerprint)
      }
      Self::Failed(_) => None,
    }
  }

  /// One-line human-readable description for the batch report.
  pub fn detail(&self) -> String {
    match self {
      Self::Accepted { record, previous: Some(prev) } => {
        format!("recorded {:?} (previous {})", record.title, prev.short())
      }
      Self::Accepted { record, previous: None } => {
        format!("recorded {:?} (first update)", record.title)
      }
      Self::SkippedDuplicate { fingerprint } => {
        format!("content {} already recorded", fingerprint.short())
      }
      Self::SkippedDailyLimit { day, .. } => format!("an update was already accepted on {day}"),
      Self::Failed(error) => error.to_string(),
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Runs one product through fetch → fingerprint → ledger → persist.
pub struct IngestionPipeline<S, F, Z> {
  store:         Arc<S>,
  source:        Arc<F>,
  summarizer:    Arc<Z>,
  clock:         Arc<dyn Clock>,
  fingerprinter: Fingerprinter,
  config:        PipelineConfig,
}

impl<S, F, Z> IngestionPipeline<S, F, Z>
where
  S: UpdateStore,
  F: ChangelogSource,
  Z: Summarizer,
{
  pub fn new(
    store: Arc<S>,
    source: Arc<F>,
    summarizer: Arc<Z>,
    clock: Arc<dyn Clock>,
    fingerprinter: Fingerprinter,
    config: PipelineConfig,
  ) -> Self {
    Self { store, source, summarizer, clock, fingerprinter, config }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn clock(&self) -> &Arc<dyn Clock> { &self.clock }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  /// Run the state machine for `product` and update its last-crawl status.
  pub async fn run(&self, product: &TrackedProduct, metrics: &BatchMetrics) -> IngestOutcome {
    let span = tracing::info_span!("ingest", product = %product.slug);
    async {
      let outcome = match self.evaluate(product, metrics).await {
        Ok(outcome) => outcome,
        Err(error) => {
          warn!(%error, retryable = error.is_retryable(), "ingestion failed");
          IngestOutcome::Failed(error)
        }
      };
      self.update_status(product, &outcome).await;
      info!(outcome = %outcome.kind(), detail = %outcome.detail(), "ingestion finished");
      outcome
    }
    .instrument(span)
    .await
  }

  async fn evaluate(
    &self,
    product: &TrackedProduct,
    metrics: &BatchMetrics,
  ) -> Result<IngestOutcome, IngestError> {
    let now = self.clock.now();
    let today = now.date_naive();

    let candidate = self.fetch(product, metrics).await?;
    debug!(stage = %Stage::Fetched, title = %candidate.title);

    let normalized = self
      .fingerprinter
      .normalize(&candidate)
      .map_err(normalization_failed)?;
    debug!(stage = %Stage::Normalized);

    let fingerprint = self.fingerprinter.fingerprint(&product.slug, &normalized);
    metrics.incr(Counter::FingerprintsComputed);
    debug!(stage = %Stage::Fingerprinted, fingerprint = %fingerprint.short());

    // Exact replay guard, across all days.
    if self
      .store
      .has_fingerprint(&product.slug, &fingerprint)
      .await
      .map_err(ledger_unavailable)?
    {
      debug!(stage = %Stage::Duplicate);
      return Ok(IngestOutcome::SkippedDuplicate { fingerprint });
    }

    // At most one accepted update per product per UTC day.
    if self
      .store
      .has_any_on_day(&product.slug, today)
      .await
      .map_err(ledger_unavailable)?
    {
      debug!(stage = %Stage::DailyLimitReached);
      return Ok(IngestOutcome::SkippedDailyLimit { fingerprint, day: today });
    }

    let previous = self
      .store
      .latest_fingerprint(&product.slug)
      .await
      .map_err(ledger_unavailable)?;
    debug!(stage = %Stage::Accepted);

    let summary = self.summarize(&candidate.body, metrics).await;
    let record = self.build_record(product, candidate, &normalized, fingerprint.clone(), summary, now);

    // The lookups above are advisory; this conditional insert is the one
    // that decides. A lost race resolves to a skip.
    match self.store.commit_update(record).await {
      Ok(CommitOutcome::Inserted(record)) => {
        debug!(stage = %Stage::Persisted, record_id = %record.record_id);
        Ok(IngestOutcome::Accepted { record, previous })
      }
      Ok(CommitOutcome::DuplicateFingerprint) => {
        metrics.incr(Counter::LostRaces);
        Ok(IngestOutcome::SkippedDuplicate { fingerprint })
      }
      Ok(CommitOutcome::DailyLimitReached) => {
        metrics.incr(Counter::LostRaces);
        Ok(IngestOutcome::SkippedDailyLimit { fingerprint, day: today })
      }
      Ok(CommitOutcome::Busy) => Err(IngestError::LedgerUnavailable(
        "store busy; another writer holds the write lock".into(),
      )),
      Err(e) => Err(IngestError::PersistenceFailed(e.to_string())),
    }
  }

  async fn fetch(
    &self,
    product: &TrackedProduct,
    metrics: &BatchMetrics,
  ) -> Result<UpdateCandidate, IngestError> {
    let fetch = self.source.fetch_candidate(product);
    match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
      Ok(Ok(candidate)) => {
        metrics.incr(Counter::CandidatesFetched);
        Ok(candidate)
      }
      Ok(Err(e)) => {
        metrics.incr(Counter::FetchFailures);
        Err(IngestError::SourceUnavailable(e.to_string()))
      }
      Err(_) => {
        metrics.incr(Counter::FetchFailures);
        metrics.incr(Counter::FetchTimeouts);
        Err(IngestError::SourceUnavailable(format!(
          "fetch timed out after {:?}",
          self.config.fetch_timeout
        )))
      }
    }
  }

  /// Summaries are optional: any failure degrades to `None`.
  async fn summarize(&self, body: &str, metrics: &BatchMetrics) -> Option<Summary> {
    let call = self.summarizer.summarize(body);
    let error = match tokio::time::timeout(self.config.summarize_timeout, call).await {
      Ok(Ok(summary)) => {
        metrics.incr(Counter::SummariesProduced);
        return Some(summary);
      }
      Ok(Err(e)) => IngestError::SummarizationFailed(e.0),
      Err(_) => IngestError::SummarizationFailed(format!(
        "timed out after {:?}",
        self.config.summarize_timeout
      )),
    };
    metrics.incr(Counter::SummariesDegraded);
    warn!(%error, "persisting without summary");
    None
  }

  fn build_record(
    &self,
    product: &TrackedProduct,
    candidate: UpdateCandidate,
    normalized: &NormalizedCandidate,
    fingerprint: Fingerprint,
    summary: Option<Summary>,
    now: DateTime<Utc>,
  ) -> NewUpdateRecord {
    let version = candidate
      .version
      .as_deref()
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_owned);

    let title = match candidate.title.trim() {
      "" => match &version {
        Some(v) => format!("{} {v}", product.name),
        None => product.name.clone(),
      },
      t => t.to_owned(),
    };

    let mut tags: BTreeSet<String> = candidate
      .tags
      .iter()
      .map(|t| t.trim().to_lowercase())
      .filter(|t| !t.is_empty())
      .collect();
    tags.insert(candidate.provenance.method.as_ref().to_owned());
    if !normalized.version.is_empty() {
      tags.insert("versioned".to_owned());
    }

    let default_confidence = self.config.default_confidence;
    let (summary, key_points, importance, confidence) = match summary {
      Some(s) => (
        Some(s.summary),
        Some(s.key_points),
        s.importance.unwrap_or_default(),
        s.confidence.unwrap_or(default_confidence),
      ),
      None => (None, None, Importance::default(), default_confidence),
    };

    NewUpdateRecord {
      product_slug: product.slug.clone(),
      title,
      summary,
      key_points,
      importance,
      tags,
      version,
      published_at: candidate.published_at.unwrap_or(now),
      fingerprint,
      source_url: candidate
        .provenance
        .source_url
        .or_else(|| product.changelog_url.clone()),
      confidence: clamp_confidence(confidence, default_confidence),
      ingested_at: now,
    }
  }

  async fn update_status(&self, product: &TrackedProduct, outcome: &IngestOutcome) {
    let now = self.clock.now();
    let crawl = match outcome {
      IngestOutcome::Failed(error) => LastCrawl::failure(now, error.to_string()),
      _ => LastCrawl::success(now),
    };
    match self.store.record_crawl(&product.slug, crawl).await {
      Ok(()) => debug!(stage = %Stage::StatusUpdated),
      Err(e) => warn!(error = %e, "could not update crawl status"),
    }
  }
}

pub(crate) fn normalization_failed(e: Error) -> IngestError {
  match e {
    Error::EmptyContent => IngestError::EmptyContent,
    other => IngestError::InvalidCandidate(other.to_string()),
  }
}

fn ledger_unavailable<E: std::error::Error>(e: E) -> IngestError {
  IngestError::LedgerUnavailable(e.to_string())
}
