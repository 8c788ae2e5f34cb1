//! Tracked products: the things whose changelogs are watched.
//!
//! Products are created from configuration (see `seed` in the CLI) and are
//! never deleted during normal operation. The pipeline updates their
//! last-crawl metadata after every attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

/// Whether a product takes part in "all active" batches.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductStatus {
  #[default]
  Active,
  Inactive,
}

impl ProductStatus {
  pub fn is_active(self) -> bool { matches!(self, Self::Active) }
}

// ─── Last crawl ──────────────────────────────────────────────────────────────

/// Result of the most recent ingestion attempt, from the product's viewpoint.
///
/// Skips count as `Success`: the source was read and the ledger answered.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CrawlOutcome {
  Success,
  Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastCrawl {
  pub at:      DateTime<Utc>,
  pub outcome: CrawlOutcome,
  pub error:   Option<String>,
}

impl LastCrawl {
  pub fn success(at: DateTime<Utc>) -> Self {
    Self { at, outcome: CrawlOutcome::Success, error: None }
  }

  pub fn failure(at: DateTime<Utc>, error: impl Into<String>) -> Self {
    Self { at, outcome: CrawlOutcome::Failure, error: Some(error.into()) }
  }
}

// ─── Product ─────────────────────────────────────────────────────────────────

/// A product whose changelog is tracked. The slug is its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProduct {
  pub slug:          String,
  pub name:          String,
  pub homepage:      Option<String>,
  /// Where the changelog source reads from.
  pub changelog_url: Option<String>,
  pub status:        ProductStatus,
  pub last_crawl:    Option<LastCrawl>,
  pub created_at:    DateTime<Utc>,
}

// ─── NewProduct ──────────────────────────────────────────────────────────────

/// Input to [`crate::store::UpdateStore::upsert_product`]; also the shape of
/// a `[[products]]` seed entry in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
  pub slug:          String,
  pub name:          String,
  #[serde(default)]
  pub homepage:      Option<String>,
  #[serde(default)]
  pub changelog_url: Option<String>,
  #[serde(default)]
  pub status:        ProductStatus,
}

impl NewProduct {
  /// Convenience constructor for an active product with no source URLs.
  pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      slug:          slug.into(),
      name:          name.into(),
      homepage:      None,
      changelog_url: None,
      status:        ProductStatus::Active,
    }
  }

  pub fn with_changelog_url(mut self, url: impl Into<String>) -> Self {
    self.changelog_url = Some(url.into());
    self
  }

  /// Reject slugs that could not appear in a URL path segment.
  pub fn validate(&self) -> Result<()> {
    validate_slug(&self.slug)
  }
}

/// Slugs are non-empty and made of lowercase ASCII letters, digits, `-`, `_`
/// and `.`.
pub fn validate_slug(slug: &str) -> Result<()> {
  let ok = !slug.is_empty()
    && slug.chars().all(|c| {
      c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
    });
  if ok { Ok(()) } else { Err(Error::InvalidSlug(slug.to_owned())) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn slug_rules() {
    assert!(validate_slug("cursor").is_ok());
    assert!(validate_slug("github-copilot").is_ok());
    assert!(validate_slug("v0.dev").is_ok());
    assert!(validate_slug("").is_err());
    assert!(validate_slug("Cursor").is_err());
    assert!(validate_slug("a/b").is_err());
  }

  #[test]
  fn status_string_forms() {
    assert_eq!(ProductStatus::Inactive.as_ref(), "inactive");
    assert_eq!("active".parse::<ProductStatus>().unwrap(), ProductStatus::Active);
    assert_eq!(CrawlOutcome::Failure.to_string(), "failure");
  }
}
