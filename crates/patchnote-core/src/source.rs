//! The changelog source collaborator.
//!
//! How a candidate is obtained (HTTP scrape, curated file, ...) is opaque to
//! the pipeline. Implementations live in the binaries.

use std::future::Future;

use thiserror::Error;

use crate::{candidate::UpdateCandidate, product::TrackedProduct};

/// Why a source could not produce a candidate. The pipeline turns every
/// variant into a retryable `SourceUnavailable`.
#[derive(Debug, Error)]
pub enum SourceError {
  #[error("no changelog source configured for {0}")]
  NotConfigured(String),

  #[error("upstream returned HTTP {0}")]
  Status(u16),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("no candidate found: {0}")]
  NoCandidate(String),
}

/// Produces the current changelog candidate for a product.
pub trait ChangelogSource: Send + Sync {
  fn fetch_candidate<'a>(
    &'a self,
    product: &'a TrackedProduct,
  ) -> impl Future<Output = Result<UpdateCandidate, SourceError>> + Send + 'a;
}
