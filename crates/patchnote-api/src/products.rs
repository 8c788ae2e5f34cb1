//! Handlers for `/products` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/products` | Optional `?active=true` |
//! | `GET`  | `/products/{slug}` | 404 if not found |
//! | `GET`  | `/products/{slug}/updates` | Optional `?limit=N` (default 20, max 100); 404 if not found |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use patchnote_core::{
  product::TrackedProduct,
  record::UpdateRecord,
  source::ChangelogSource,
  store::UpdateStore,
  summary::Summarizer,
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

pub const DEFAULT_UPDATES_LIMIT: usize = 20;
pub const MAX_UPDATES_LIMIT: usize = 100;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub active: bool,
}

/// `GET /products[?active=true]`
pub async fn list<S, F, Z>(
  State(state): State<ApiState<S, F, Z>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<TrackedProduct>>, ApiError>
where
  S: UpdateStore + 'static,
  F: ChangelogSource + 'static,
  Z: Summarizer + 'static,
{
  let products = state
    .store()
    .list_products(params.active)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(products))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /products/{slug}`
pub async fn get_one<S, F, Z>(
  State(state): State<ApiState<S, F, Z>>,
  Path(slug): Path<String>,
) -> Result<Json<TrackedProduct>, ApiError>
where
  S: UpdateStore + 'static,
  F: ChangelogSource + 'static,
  Z: Summarizer + 'static,
{
  let product = state
    .store()
    .get_product(&slug)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("product {slug} not found")))?;
  Ok(Json(product))
}

// ─── Updates ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdatesParams {
  pub limit: Option<usize>,
}

/// `GET /products/{slug}/updates[?limit=N]`, newest first.
pub async fn updates<S, F, Z>(
  State(state): State<ApiState<S, F, Z>>,
  Path(slug): Path<String>,
  Query(params): Query<UpdatesParams>,
) -> Result<Json<Vec<UpdateRecord>>, ApiError>
where
  S: UpdateStore + 'static,
  F: ChangelogSource + 'static,
  Z: Summarizer + 'static,
{
  let limit = match params.limit {
    None => DEFAULT_UPDATES_LIMIT,
    Some(0) => return Err(ApiError::BadRequest("limit must be at least 1".into())),
    Some(n) => n.min(MAX_UPDATES_LIMIT),
  };

  let store = state.store();
  if store.get_product(&slug).await.map_err(ApiError::store)?.is_none() {
    return Err(ApiError::NotFound(format!("product {slug} not found")));
  }

  let records = store
    .recent_updates(&slug, limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}
