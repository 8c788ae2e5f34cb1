//! The summarization collaborator.
//!
//! Summaries enrich a record but never gate it: fingerprinting works on the
//! normalized raw body, and a failed summary only leaves `summary` and
//! `key_points` empty on the persisted record.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Importance;

/// What a summarizer returns for a changelog body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
  pub summary:    String,
  #[serde(default)]
  pub key_points: Vec<String>,
  #[serde(default)]
  pub importance: Option<Importance>,
  /// Unclamped; the pipeline clamps it into `[0, 1]`.
  #[serde(default)]
  pub confidence: Option<f64>,
}

#[derive(Debug, Error)]
#[error("summarization failed: {0}")]
pub struct SummarizeError(pub String);

pub trait Summarizer: Send + Sync {
  fn summarize<'a>(
    &'a self,
    body: &'a str,
  ) -> impl Future<Output = Result<Summary, SummarizeError>> + Send + 'a;
}

/// A summarizer that is never available. Records persist without summaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSummarizer;

impl Summarizer for NoSummarizer {
  async fn summarize(&self, _body: &str) -> Result<Summary, SummarizeError> {
    Err(SummarizeError("no summarizer configured".into()))
  }
}
