//! Error types for `patchnote-core`.

use thiserror::Error;

/// Errors raised by core types and the in-memory store.
#[derive(Debug, Error)]
pub enum Error {
  #[error("product not found: {0}")]
  ProductNotFound(String),

  #[error("invalid product slug: {0:?}")]
  InvalidSlug(String),

  #[error("invalid fingerprint: {0:?}")]
  InvalidFingerprint(String),

  /// Title and body were both empty after normalization.
  #[error("candidate has no content after normalization")]
  EmptyContent,

  #[error("store unavailable")]
  StoreUnavailable,

  #[error("store write failed: {0}")]
  WriteFailed(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Per-product ingestion errors ────────────────────────────────────────────

/// Why a single product's ingestion attempt failed.
///
/// These never escape the pipeline as `Err`; they are carried inside a
/// [`crate::pipeline::IngestOutcome::Failed`] and surface in the batch report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
  /// Fetch failed or timed out. Retried at the next scheduled batch.
  #[error("source unavailable: {0}")]
  SourceUnavailable(String),

  /// Nothing left to fingerprint. Not retryable.
  #[error("candidate has no content after normalization")]
  EmptyContent,

  /// Normalization rejected the candidate for another reason. Not retryable.
  #[error("invalid candidate: {0}")]
  InvalidCandidate(String),

  /// The summarizer failed. The pipeline degrades instead of failing, so this
  /// only appears in logs and metrics.
  #[error("summarization failed: {0}")]
  SummarizationFailed(String),

  /// A ledger lookup could not be answered. Never read as "not a duplicate".
  #[error("ledger unavailable: {0}")]
  LedgerUnavailable(String),

  #[error("persistence failed: {0}")]
  PersistenceFailed(String),
}

impl IngestError {
  /// Whether the next scheduled batch may succeed where this one failed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::SourceUnavailable(_) | Self::LedgerUnavailable(_))
  }
}

// ─── Batch-level errors ──────────────────────────────────────────────────────

/// Errors that abort a whole batch. Per-product failures never end up here.
#[derive(Debug, Error)]
pub enum BatchError {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("could not enumerate products: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}
