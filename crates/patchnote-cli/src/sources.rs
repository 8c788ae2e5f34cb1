//! Concrete [`ChangelogSource`] implementations.
//!
//! - [`CuratedSource`]: a JSON file mapping product slug to one entry. Read
//!   on every fetch so edits take effect without a restart.
//! - [`HttpSource`]: GET the product's `changelog_url`, lift the first
//!   heading as the title and keep the markup of the section under it as
//!   the body; the fingerprinter reduces that markup to text later.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use patchnote_core::{
  candidate::{ExtractionMethod, UpdateCandidate},
  fingerprint::markup_text,
  product::TrackedProduct,
  source::{ChangelogSource, SourceError},
};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;

// ─── Curated file ─────────────────────────────────────────────────────────────

/// One entry of the curated file.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedEntry {
  pub title:        String,
  #[serde(default)]
  pub body:         String,
  #[serde(default)]
  pub version:      Option<String>,
  #[serde(default)]
  pub published_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub tags:         Vec<String>,
  #[serde(default)]
  pub source_url:   Option<String>,
}

impl CuratedEntry {
  fn into_candidate(self, fallback_url: Option<&str>) -> UpdateCandidate {
    let mut candidate = UpdateCandidate::new(self.title, self.body);
    candidate.version = self.version;
    candidate.published_at = self.published_at;
    candidate.tags = self.tags;
    candidate.provenance.method = ExtractionMethod::Curated;
    candidate.provenance.source_url = self.source_url.or_else(|| fallback_url.map(str::to_owned));
    candidate
  }
}

#[derive(Debug, Clone)]
pub struct CuratedSource {
  path: PathBuf,
}

impl CuratedSource {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

impl ChangelogSource for CuratedSource {
  async fn fetch_candidate(&self, product: &TrackedProduct) -> Result<UpdateCandidate, SourceError> {
    let raw = tokio::fs::read_to_string(&self.path)
      .await
      .map_err(|e| SourceError::Transport(format!("{}: {e}", self.path.display())))?;
    let mut entries: HashMap<String, CuratedEntry> = serde_json::from_str(&raw)
      .map_err(|e| SourceError::Transport(format!("{}: {e}", self.path.display())))?;

    let entry = entries
      .remove(&product.slug)
      .ok_or_else(|| SourceError::NoCandidate(format!("{} has no curated entry", product.slug)))?;
    Ok(entry.into_candidate(product.changelog_url.as_deref()))
  }
}

// ─── HTTP scrape ──────────────────────────────────────────────────────────────

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpSource {
  client: Client,
}

impl HttpSource {
  pub fn new(timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("patchnote/", env!("CARGO_PKG_VERSION")))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client })
  }
}

impl ChangelogSource for HttpSource {
  async fn fetch_candidate(&self, product: &TrackedProduct) -> Result<UpdateCandidate, SourceError> {
    let url = product
      .changelog_url
      .as_deref()
      .ok_or_else(|| SourceError::NotConfigured(product.slug.clone()))?;

    let resp = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| SourceError::Transport(e.to_string()))?;
    if !resp.status().is_success() {
      return Err(SourceError::Status(resp.status().as_u16()));
    }
    let page = resp
      .text()
      .await
      .map_err(|e| SourceError::Transport(e.to_string()))?;
    debug!(product = %product.slug, bytes = page.len(), "changelog page fetched");

    candidate_from_page(url, &page)
      .ok_or_else(|| SourceError::NoCandidate(format!("no heading or title in {url}")))
  }
}

/// Build a candidate from a changelog page. `None` when the page has no
/// heading and no `<title>`.
///
/// The title is the first non-empty `<h1>`, `<h2>` or `<title>`. The body is
/// the markup between that heading and the next heading of the same or a
/// higher rank; for a `<title>` it is the page's main content area.
pub fn candidate_from_page(url: &str, page: &str) -> Option<UpdateCandidate> {
  let document = Html::parse_document(page);
  let (heading, title) = ["h1", "h2", "title"]
    .iter()
    .find_map(|tag| first_heading(&document, tag))?;
  let version = find_version(&title);

  let section = match heading_rank(heading.value().name()) {
    Some(rank) => section_after(heading, rank),
    None => String::new(),
  };
  let body = if markup_text(&section).trim().is_empty() {
    main_content(&document)?.html()
  } else {
    section
  };

  let mut candidate = UpdateCandidate::new(title, body).from_source(url, ExtractionMethod::Scraped);
  candidate.version = version;
  Some(candidate)
}

/// The first `tag` element with visible text, and that text on one line.
fn first_heading<'a>(document: &'a Html, tag: &str) -> Option<(ElementRef<'a>, String)> {
  let selector = Selector::parse(tag).ok()?;
  document.select(&selector).find_map(|element| {
    let text = element.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some((element, text))
  })
}

/// `1` for `h1` through `6` for `h6`.
fn heading_rank(name: &str) -> Option<u8> {
  let digit = name.strip_prefix('h')?.parse::<u8>().ok()?;
  (1..=6).contains(&digit).then_some(digit)
}

/// Markup of the siblings that follow `heading`, up to the next heading of
/// rank `rank` or higher.
fn section_after(heading: ElementRef<'_>, rank: u8) -> String {
  let mut out = String::new();
  for sibling in heading.next_siblings() {
    if let Some(element) = ElementRef::wrap(sibling) {
      if heading_rank(element.value().name()).is_some_and(|r| r <= rank) {
        break;
      }
      out.push_str(&element.html());
    } else if let Some(text) = sibling.value().as_text() {
      out.push_str(&html_escape::encode_text(&**text));
    }
  }
  out
}

/// The page's `<article>`, `<main>` or `<body>`, in that order.
fn main_content(document: &Html) -> Option<ElementRef<'_>> {
  ["article", "main", "body"].iter().find_map(|tag| {
    let selector = Selector::parse(tag).ok()?;
    document.select(&selector).next()
  })
}

/// The first token shaped like a version number, e.g. `1.2`, `v0.190.3`.
fn find_version(title: &str) -> Option<String> {
  title
    .split(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')' | ':' | '-'))
    .map(|token| token.trim_end_matches('.'))
    .find(|token| {
      let digits = token.strip_prefix(['v', 'V']).unwrap_or(token);
      digits.contains('.')
        && digits.split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    })
    .map(str::to_owned)
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

/// The source selected by `[source] kind`.
pub enum AnySource {
  Curated(CuratedSource),
  Http(HttpSource),
}

impl ChangelogSource for AnySource {
  async fn fetch_candidate(&self, product: &TrackedProduct) -> Result<UpdateCandidate, SourceError> {
    match self {
      AnySource::Curated(source) => source.fetch_candidate(product).await,
      AnySource::Http(source) => source.fetch_candidate(product).await,
    }
  }
}
