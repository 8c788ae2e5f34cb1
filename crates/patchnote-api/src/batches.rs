//! Handler for `POST /batches`, the on-demand batch trigger.
//!
//! Body: `{"slugs": ["cursor", ...]}`. An omitted body or an empty list runs
//! every active product. The response is the full batch report; individual
//! product failures do not change the status code.

use axum::{Json, extract::State};
use patchnote_core::{
  batch::{BatchReport, ProductSelector},
  source::ChangelogSource,
  store::UpdateStore,
  summary::Summarizer,
};
use serde::Deserialize;
use tracing::info;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct BatchRequest {
  #[serde(default)]
  pub slugs: Vec<String>,
}

/// `POST /batches`
pub async fn create<S, F, Z>(
  State(state): State<ApiState<S, F, Z>>,
  body: Option<Json<BatchRequest>>,
) -> Result<Json<BatchReport>, ApiError>
where
  S: UpdateStore + 'static,
  F: ChangelogSource + 'static,
  Z: Summarizer + 'static,
{
  let request = body.map(|Json(r)| r).unwrap_or_default();
  let selector = ProductSelector::from_slugs(request.slugs);
  info!(?selector, "batch triggered over HTTP");

  let report = state
    .coordinator
    .run_batch(&selector, &state.shutdown)
    .await?;
  Ok(Json(report))
}
