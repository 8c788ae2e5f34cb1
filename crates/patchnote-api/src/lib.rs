//! JSON REST API for patchnote.
//!
//! Exposes an axum [`Router`] over a [`BatchCoordinator`]: read products and
//! their recent updates, and trigger a batch on demand. Auth, TLS, and
//! request tracing are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", patchnote_api::api_router(state))
//! ```

pub mod batches;
pub mod error;
pub mod products;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use patchnote_core::{
  batch::BatchCoordinator,
  source::ChangelogSource,
  store::UpdateStore,
  summary::Summarizer,
};
use tokio_util::sync::CancellationToken;

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct ApiState<S, F, Z> {
  pub coordinator: Arc<BatchCoordinator<S, F, Z>>,
  /// Cancelled on server shutdown; batches triggered over HTTP stop starting
  /// new products once it fires.
  pub shutdown:    CancellationToken,
}

impl<S, F, Z> ApiState<S, F, Z>
where
  S: UpdateStore,
  F: ChangelogSource,
  Z: Summarizer,
{
  pub fn new(coordinator: Arc<BatchCoordinator<S, F, Z>>, shutdown: CancellationToken) -> Self {
    Self { coordinator, shutdown }
  }

  pub fn store(&self) -> &S { self.coordinator.pipeline().store() }
}

impl<S, F, Z> Clone for ApiState<S, F, Z> {
  fn clone(&self) -> Self {
    Self { coordinator: self.coordinator.clone(), shutdown: self.shutdown.clone() }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, F, Z>(state: ApiState<S, F, Z>) -> Router<()>
where
  S: UpdateStore + 'static,
  F: ChangelogSource + 'static,
  Z: Summarizer + 'static,
{
  Router::new()
    // Products
    .route("/products", get(products::list::<S, F, Z>))
    .route("/products/{slug}", get(products::get_one::<S, F, Z>))
    .route("/products/{slug}/updates", get(products::updates::<S, F, Z>))
    // Batches
    .route("/batches", post(batches::create::<S, F, Z>))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::{TimeZone, Utc};
  use patchnote_core::{
    batch::{BatchReport, OutcomeKind},
    candidate::UpdateCandidate,
    clock::FixedClock,
    fingerprint::Fingerprinter,
    memory::MemoryStore,
    pipeline::{IngestionPipeline, PipelineConfig},
    product::{NewProduct, ProductStatus, TrackedProduct},
    record::UpdateRecord,
    source::SourceError,
    summary::NoSummarizer,
  };
  use serde::de::DeserializeOwned;
  use tower::ServiceExt as _;

  use super::*;

  /// Every product publishes the same entry, titled after the product.
  struct EchoSource;

  impl ChangelogSource for EchoSource {
    async fn fetch_candidate(
      &self,
      product: &TrackedProduct,
    ) -> Result<UpdateCandidate, SourceError> {
      Ok(UpdateCandidate::new(format!("{} 1.0", product.name), "First release"))
    }
  }

  type TestState = ApiState<MemoryStore, EchoSource, NoSummarizer>;

  async fn make_state() -> TestState {
    let store = MemoryStore::new();
    store.upsert_product(NewProduct::new("cursor", "Cursor")).await.unwrap();
    store.upsert_product(NewProduct::new("zed", "Zed")).await.unwrap();
    store.set_product_status("zed", ProductStatus::Inactive).await.unwrap();

    let pipeline = IngestionPipeline::new(
      Arc::new(store),
      Arc::new(EchoSource),
      Arc::new(NoSummarizer),
      Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 7, 3, 9, 0, 0).unwrap())),
      Fingerprinter::default(),
      PipelineConfig::default(),
    );
    ApiState::new(
      Arc::new(BatchCoordinator::new(Arc::new(pipeline), 2)),
      CancellationToken::new(),
    )
  }

  async fn send(
    state:  &TestState,
    method: &str,
    uri:    &str,
    body:   Option<&str>,
  ) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_owned())
      }
      None => Body::empty(),
    };
    api_router(state.clone()).oneshot(builder.body(body).unwrap()).await.unwrap()
  }

  async fn json<T: DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  // ── Products ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn list_products_with_active_filter() {
    let state = make_state().await;

    let all: Vec<TrackedProduct> = json(send(&state, "GET", "/products", None).await).await;
    assert_eq!(all.len(), 2);

    let resp = send(&state, "GET", "/products?active=true", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let active: Vec<TrackedProduct> = json(resp).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].slug, "cursor");
  }

  #[tokio::test]
  async fn unknown_product_is_404() {
    let state = make_state().await;
    let resp = send(&state, "GET", "/products/ghost/updates", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    let resp = send(&state, "GET", "/products/ghost", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn zero_limit_is_rejected() {
    let state = make_state().await;
    let resp = send(&state, "GET", "/products/cursor/updates?limit=0", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  // ── Batches ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn trigger_without_body_runs_all_active() {
    let state = make_state().await;

    let resp = send(&state, "POST", "/batches", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: BatchReport = json(resp).await;
    assert_eq!(report.total_selected, 1);
    assert_eq!(report.counts.accepted, 1);

    let updates: Vec<UpdateRecord> =
      json(send(&state, "GET", "/products/cursor/updates?limit=5", None).await).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].title, "Cursor 1.0");
  }

  #[tokio::test]
  async fn trigger_with_slugs_reports_each_product() {
    let state = make_state().await;

    let body = r#"{"slugs":["zed","ghost"]}"#;
    let report: BatchReport = json(send(&state, "POST", "/batches", Some(body)).await).await;
    assert_eq!(report.result_for("zed").unwrap().outcome, OutcomeKind::Accepted);
    assert_eq!(report.result_for("ghost").unwrap().outcome, OutcomeKind::NotFound);

    // Replaying is a 200 with nothing accepted.
    let resp = send(&state, "POST", "/batches", Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let replay: BatchReport = json(resp).await;
    assert_eq!(replay.counts.accepted, 0);
    assert_eq!(replay.counts.skipped_duplicate, 1);
  }

  #[tokio::test]
  async fn shutdown_cancels_triggered_batches() {
    let state = make_state().await;
    state.shutdown.cancel();

    let resp = send(&state, "POST", "/batches", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: BatchReport = json(resp).await;
    assert!(report.cancelled);
    assert_eq!(report.not_started, 1);
    assert_eq!(state.store().count_updates("cursor").await.unwrap(), 0);
  }
}
