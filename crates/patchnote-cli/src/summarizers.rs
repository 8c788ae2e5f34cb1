//! Concrete [`Summarizer`] implementations.

use std::time::Duration;

use anyhow::Context as _;
use patchnote_core::summary::{NoSummarizer, SummarizeError, Summarizer, Summary};
use reqwest::Client;
use serde_json::json;

/// POSTs `{"text": ..}` to an endpoint that answers with a [`Summary`].
#[derive(Clone)]
pub struct HttpSummarizer {
  client:   Client,
  endpoint: String,
}

impl HttpSummarizer {
  pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, endpoint: endpoint.into() })
  }
}

impl Summarizer for HttpSummarizer {
  async fn summarize(&self, body: &str) -> Result<Summary, SummarizeError> {
    let resp = self
      .client
      .post(&self.endpoint)
      .json(&json!({ "text": body }))
      .send()
      .await
      .map_err(|e| SummarizeError(e.to_string()))?;

    if !resp.status().is_success() {
      return Err(SummarizeError(format!("{} answered {}", self.endpoint, resp.status())));
    }
    resp
      .json::<Summary>()
      .await
      .map_err(|e| SummarizeError(format!("malformed summary: {e}")))
  }
}

/// The summarizer selected by `[summarizer] kind`.
pub enum AnySummarizer {
  None(NoSummarizer),
  Http(HttpSummarizer),
}

impl Summarizer for AnySummarizer {
  async fn summarize(&self, body: &str) -> Result<Summary, SummarizeError> {
    match self {
      AnySummarizer::None(summarizer) => summarizer.summarize(body).await,
      AnySummarizer::Http(summarizer) => summarizer.summarize(body).await,
    }
  }
}
