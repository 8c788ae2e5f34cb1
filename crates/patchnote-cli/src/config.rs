//! Runtime configuration.
//!
//! Read from an optional TOML file (default `patchnote.toml`), then overlaid
//! with `PATCHNOTE_*` environment variables; nested keys use `__`, e.g.
//! `PATCHNOTE_BATCH__CONCURRENCY=8`.

use std::{path::{Path, PathBuf}, time::Duration};

use anyhow::{Context as _, Result, bail};
use patchnote_core::{
  fingerprint::FingerprintConfig,
  pipeline::PipelineConfig,
  product::{NewProduct, validate_slug},
};
use serde::Deserialize;

// ─── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
  pub concurrency:            usize,
  pub fetch_timeout_secs:     u64,
  pub summarize_timeout_secs: u64,
  pub default_confidence:     f64,
}

impl Default for BatchSettings {
  fn default() -> Self {
    Self {
      concurrency:            4,
      fetch_timeout_secs:     30,
      summarize_timeout_secs: 60,
      default_confidence:     0.5,
    }
  }
}

impl BatchSettings {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      fetch_timeout:      Duration::from_secs(self.fetch_timeout_secs),
      summarize_timeout:  Duration::from_secs(self.summarize_timeout_secs),
      default_confidence: self.default_confidence,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  /// Scrape each product's `changelog_url`.
  #[default]
  Http,
  /// Read candidates from a JSON file keyed by product slug.
  Curated,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
  pub kind:         SourceKind,
  pub curated_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
  #[default]
  None,
  Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
  pub kind:     SummarizerKind,
  pub endpoint: Option<String>,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub store_path:            PathBuf,
  /// How long a commit waits on another process's write lock.
  pub store_busy_timeout_ms: u64,
  pub host:                  String,
  pub port:                  u16,
  pub batch:                 BatchSettings,
  pub fingerprint:           FingerprintConfig,
  pub source:                SourceSettings,
  pub summarizer:            SummarizerSettings,
  /// Products created or refreshed by `patchnote seed`.
  pub products:              Vec<NewProduct>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      store_path:            PathBuf::from("patchnote.db"),
      store_busy_timeout_ms: 5000,
      host:                  "127.0.0.1".to_owned(),
      port:                  8080,
      batch:                 BatchSettings::default(),
      fingerprint:           FingerprintConfig::default(),
      source:                SourceSettings::default(),
      summarizer:            SummarizerSettings::default(),
      products:              Vec::new(),
    }
  }
}

impl AppConfig {
  /// Load `path` (if it exists) and the environment.
  pub fn load(path: &Path) -> Result<Self> {
    let settings = ::config::Config::builder()
      .add_source(::config::File::from(path).required(false))
      .add_source(
        ::config::Environment::with_prefix("PATCHNOTE")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config from {}", path.display()))?;

    let cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;
    cfg.validate()?;
    Ok(cfg)
  }

  /// Reject configuration no batch could run with.
  pub fn validate(&self) -> Result<()> {
    if self.batch.concurrency == 0 {
      bail!("batch.concurrency must be at least 1");
    }
    self
      .batch
      .pipeline_config()
      .validate()
      .context("invalid [batch] section")?;
    if self.source.kind == SourceKind::Curated && self.source.curated_path.is_none() {
      bail!("source.kind = \"curated\" requires source.curated_path");
    }
    if self.summarizer.kind == SummarizerKind::Http && self.summarizer.endpoint.is_none() {
      bail!("summarizer.kind = \"http\" requires summarizer.endpoint");
    }
    for product in &self.products {
      validate_slug(&product.slug).context("invalid [[products]] entry")?;
    }
    Ok(())
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn store_busy_timeout(&self) -> Duration { Duration::from_millis(self.store_busy_timeout_ms) }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use patchnote_core::product::ProductStatus;

  use super::*;

  fn write_config(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("patchnote-{}.toml", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
  }

  #[test]
  fn missing_file_yields_defaults() {
    let cfg = AppConfig::load(Path::new("/nonexistent/patchnote.toml")).unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.store_busy_timeout_ms, 5000);
    assert_eq!(cfg.batch.concurrency, 4);
    assert_eq!(cfg.fingerprint.keep_punctuation, ".");
    assert_eq!(cfg.source.kind, SourceKind::Http);
    assert_eq!(cfg.summarizer.kind, SummarizerKind::None);
  }

  #[test]
  fn parses_full_file() {
    let path = write_config(
      r#"
store_path = "/var/lib/patchnote.db"
store_busy_timeout_ms = 250
port = 9000

[batch]
concurrency = 2
fetch_timeout_secs = 5

[fingerprint]
keep_punctuation = ".+"

[source]
kind = "curated"
curated_path = "curated.json"

[[products]]
slug = "cursor"
name = "Cursor"
changelog_url = "https://cursor.com/changelog"

[[products]]
slug = "zed"
name = "Zed"
status = "inactive"
"#,
    );
    let cfg = AppConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.store_busy_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.batch.concurrency, 2);
    assert_eq!(cfg.batch.pipeline_config().fetch_timeout, Duration::from_secs(5));
    assert_eq!(cfg.batch.summarize_timeout_secs, 60);
    assert_eq!(cfg.fingerprint.keep_punctuation, ".+");
    assert_eq!(cfg.source.kind, SourceKind::Curated);
    assert_eq!(cfg.products.len(), 2);
    assert_eq!(cfg.products[1].status, ProductStatus::Inactive);
  }

  #[test]
  fn rejects_unusable_settings() {
    let zero = AppConfig {
      batch: BatchSettings { concurrency: 0, ..Default::default() },
      ..Default::default()
    };
    assert!(zero.validate().is_err());

    let curated_without_file = AppConfig {
      source: SourceSettings { kind: SourceKind::Curated, curated_path: None },
      ..Default::default()
    };
    assert!(curated_without_file.validate().is_err());

    let bad_confidence = AppConfig {
      batch: BatchSettings { default_confidence: 1.5, ..Default::default() },
      ..Default::default()
    };
    assert!(bad_confidence.validate().is_err());

    let bad_slug = AppConfig {
      products: vec![NewProduct::new("Cursor IDE", "Cursor")],
      ..Default::default()
    };
    assert!(bad_slug.validate().is_err());
  }
}
