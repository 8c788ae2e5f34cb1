//! Update candidates: unvalidated observations of a possible update.
//!
//! A candidate is produced by a [`crate::source::ChangelogSource`], consumed
//! by the pipeline, and discarded after normalization. It is never persisted
//! as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// How the candidate was obtained.
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
pub enum ExtractionMethod {
  /// Pulled out of a fetched changelog page.
  #[default]
  Scraped,
  /// Written or reviewed by a person.
  Curated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
  pub source_url: Option<String>,
  pub method:     ExtractionMethod,
}

/// A raw, possibly noisy observation of a changelog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCandidate {
  pub title:        String,
  /// Raw body; may still carry HTML markup residue.
  pub body:         String,
  /// Explicit version label, e.g. `"1.2"` or `"v1.2.1"`.
  pub version:      Option<String>,
  /// Explicit publish date, if the source states one.
  pub published_at: Option<DateTime<Utc>>,
  /// Extra tags supplied by the source.
  pub tags:         Vec<String>,
  pub provenance:   Provenance,
}

impl UpdateCandidate {
  /// Convenience constructor with all optional fields empty.
  pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      title:        title.into(),
      body:         body.into(),
      version:      None,
      published_at: None,
      tags:         Vec::new(),
      provenance:   Provenance::default(),
    }
  }

  pub fn with_version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }

  pub fn published(mut self, at: DateTime<Utc>) -> Self {
    self.published_at = Some(at);
    self
  }

  pub fn from_source(mut self, url: impl Into<String>, method: ExtractionMethod) -> Self {
    self.provenance = Provenance { source_url: Some(url.into()), method };
    self
  }
}
