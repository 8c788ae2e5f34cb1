//! Content fingerprints: the deduplication key for updates.
//!
//! A fingerprint is a SHA-256 digest over the normalized semantic fields of a
//! candidate: product slug, title, version label, publish day and body. The
//! fields are joined by [`FIELD_DELIMITER`], which normalization can never
//! emit, so distinct field tuples cannot collide by concatenation.
//!
//! Normalization reduces HTML to its visible text (see [`markup_text`]),
//! lowercases, turns punctuation outside the configured allow-list into word
//! breaks and collapses whitespace. Two candidates that differ only in
//! formatting therefore share a fingerprint.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result, candidate::UpdateCandidate};

/// Separates fields in the hashed input (ASCII unit separator).
pub const FIELD_DELIMITER: char = '\u{1f}';

/// Punctuation kept by default: dots, so `1.2.1` survives.
pub const DEFAULT_KEEP_PUNCTUATION: &str = ".";

const DIGEST_HEX_LEN: usize = 64;

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// A lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn as_str(&self) -> &str { &self.0 }

  /// First 12 hex digits, for log lines.
  pub fn short(&self) -> &str { &self.0[..12] }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for Fingerprint {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let valid = s.len() == DIGEST_HEX_LEN
      && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
      Ok(Self(s.to_owned()))
    } else {
      Err(Error::InvalidFingerprint(s.to_owned()))
    }
  }
}

impl TryFrom<String> for Fingerprint {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<Fingerprint> for String {
  fn from(fp: Fingerprint) -> Self { fp.0 }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// The `[fingerprint]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintConfig {
  /// Punctuation characters that survive normalization when they sit between
  /// two alphanumerics (e.g. the dots in `1.2.1`).
  #[serde(default = "default_keep_punctuation")]
  pub keep_punctuation: String,
}

fn default_keep_punctuation() -> String { DEFAULT_KEEP_PUNCTUATION.to_owned() }

impl Default for FingerprintConfig {
  fn default() -> Self { Self { keep_punctuation: default_keep_punctuation() } }
}

// ─── Normalized candidate ────────────────────────────────────────────────────

/// The semantic fields of a candidate after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCandidate {
  pub title:       String,
  /// Empty when the candidate carries no version label.
  pub version:     String,
  pub publish_day: Option<NaiveDate>,
  pub body:        String,
}

// ─── Fingerprinter ───────────────────────────────────────────────────────────

/// Applies the normalization rules and computes fingerprints.
///
/// The same instance (or one built from the same config) must be used for
/// every comparison, otherwise fingerprints drift.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
  keep: Vec<char>,
}

impl Default for Fingerprinter {
  fn default() -> Self { Self::new(&FingerprintConfig::default()) }
}

impl Fingerprinter {
  pub fn new(config: &FingerprintConfig) -> Self {
    // Alphanumerics and whitespace have fixed treatment; control characters
    // are never kept so the field delimiter cannot leak into a field.
    let keep = config
      .keep_punctuation
      .chars()
      .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control())
      .collect();
    Self { keep }
  }

  /// Normalize a free-text field.
  pub fn normalize_text(&self, raw: &str) -> String {
    let chars: Vec<char> = markup_text(raw).chars().flat_map(char::to_lowercase).collect();

    let mut out = String::with_capacity(chars.len());
    let mut pending_space = false;
    for (i, &c) in chars.iter().enumerate() {
      let keep = c.is_alphanumeric()
        || (self.keep.contains(&c)
          && i > 0
          && chars[i - 1].is_alphanumeric()
          && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric()));

      // Whitespace and dropped punctuation both end a word.
      if !keep {
        pending_space = !out.is_empty();
        continue;
      }
      if pending_space {
        out.push(' ');
        pending_space = false;
      }
      out.push(c);
    }
    out
  }

  /// Normalize a version label; a leading `v` before a digit is dropped so
  /// `v1.2` and `1.2` agree.
  pub fn normalize_version(&self, raw: &str) -> String {
    let text = self.normalize_text(raw);
    match text.strip_prefix('v') {
      Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest.to_owned(),
      _ => text,
    }
  }

  /// Normalize every semantic field of `candidate`.
  ///
  /// Fails with [`Error::EmptyContent`] when both title and body normalize to
  /// nothing; such a candidate must never be persisted.
  pub fn normalize(&self, candidate: &UpdateCandidate) -> Result<NormalizedCandidate> {
    let title = self.normalize_text(&candidate.title);
    let body = self.normalize_text(&candidate.body);
    if title.is_empty() && body.is_empty() {
      return Err(Error::EmptyContent);
    }

    Ok(NormalizedCandidate {
      title,
      version: candidate
        .version
        .as_deref()
        .map(|v| self.normalize_version(v))
        .unwrap_or_default(),
      publish_day: candidate.published_at.map(|at| at.date_naive()),
      body,
    })
  }

  /// Digest the normalized fields for `product_slug`.
  pub fn fingerprint(&self, product_slug: &str, normalized: &NormalizedCandidate) -> Fingerprint {
    let slug = product_slug.trim().to_lowercase();
    let day = normalized
      .publish_day
      .map(|d| d.format("%Y-%m-%d").to_string())
      .unwrap_or_default();

    let fields = [
      slug.as_str(),
      normalized.title.as_str(),
      normalized.version.as_str(),
      day.as_str(),
      normalized.body.as_str(),
    ];

    let mut delimiter = [0u8; 4];
    let delimiter = FIELD_DELIMITER.encode_utf8(&mut delimiter).as_bytes();

    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
      if i > 0 {
        hasher.update(delimiter);
      }
      hasher.update(field.as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
  }

  /// Normalize then fingerprint in one step.
  pub fn fingerprint_candidate(
    &self,
    product_slug: &str,
    candidate: &UpdateCandidate,
  ) -> Result<(NormalizedCandidate, Fingerprint)> {
    let normalized = self.normalize(candidate)?;
    let fingerprint = self.fingerprint(product_slug, &normalized);
    Ok((normalized, fingerprint))
  }
}

// ─── Markup residue ──────────────────────────────────────────────────────────

/// Elements whose text is never changelog content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "nav"];

/// Elements that end a word. Inline elements (`b`, `a`, `span`, ...) do not.
const BLOCK_ELEMENTS: &[&str] = &[
  "address", "article", "aside", "blockquote", "br", "dd", "details", "div", "dl", "dt",
  "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
  "main", "ol", "p", "pre", "section", "summary", "table", "td", "th", "tr", "ul",
];

/// The visible text of `raw`, with entities decoded.
///
/// Text without a `<` is only entity-decoded. Anything else is parsed as an
/// HTML fragment: script, style and navigation content is dropped, block
/// elements become word breaks and inline elements vanish, so
/// `plan<b>ning</b>` stays one word.
pub fn markup_text(raw: &str) -> String {
  if !raw.contains('<') {
    return html_escape::decode_html_entities(raw).into_owned();
  }
  let fragment = Html::parse_fragment(raw);
  let mut out = String::with_capacity(raw.len());
  collect_text(fragment.root_element(), &mut out);
  out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
  for child in element.children() {
    if let Some(text) = child.value().as_text() {
      out.push_str(text);
    } else if let Some(child) = ElementRef::wrap(child) {
      let name = child.value().name();
      if SKIPPED_ELEMENTS.contains(&name) {
        continue;
      }
      let block = BLOCK_ELEMENTS.contains(&name);
      if block {
        out.push(' ');
      }
      collect_text(child, out);
      if block {
        out.push(' ');
      }
    }
  }
}
