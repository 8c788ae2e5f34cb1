//! Subcommand implementations.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, bail};
use patchnote_api::{ApiState, api_router};
use patchnote_core::{
  batch::{BatchCoordinator, BatchReport, ProductSelector},
  clock::SystemClock,
  fingerprint::Fingerprinter,
  pipeline::IngestionPipeline,
  store::UpdateStore,
  summary::NoSummarizer,
};
use patchnote_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
  config::{AppConfig, SourceKind, SummarizerKind},
  sources::{AnySource, CuratedSource, HttpSource},
  summarizers::{AnySummarizer, HttpSummarizer},
};

type Coordinator = BatchCoordinator<SqliteStore, AnySource, AnySummarizer>;

// ─── Wiring ───────────────────────────────────────────────────────────────────

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &std::path::Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

async fn open_store(cfg: &AppConfig) -> Result<SqliteStore> {
  let path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open store at {}", path.display()))?;
  store
    .set_busy_timeout(cfg.store_busy_timeout())
    .await
    .context("failed to set the store busy timeout")?;
  Ok(store)
}

fn build_source(cfg: &AppConfig) -> Result<AnySource> {
  Ok(match cfg.source.kind {
    SourceKind::Curated => {
      let Some(path) = &cfg.source.curated_path else {
        bail!("source.curated_path is not set");
      };
      AnySource::Curated(CuratedSource::new(expand_tilde(path)))
    }
    SourceKind::Http => {
      AnySource::Http(HttpSource::new(cfg.batch.pipeline_config().fetch_timeout)?)
    }
  })
}

fn build_summarizer(cfg: &AppConfig) -> Result<AnySummarizer> {
  Ok(match (cfg.summarizer.kind, &cfg.summarizer.endpoint) {
    (SummarizerKind::Http, Some(endpoint)) => AnySummarizer::Http(HttpSummarizer::new(
      endpoint.clone(),
      cfg.batch.pipeline_config().summarize_timeout,
    )?),
    (SummarizerKind::Http, None) => bail!("summarizer.endpoint is not set"),
    (SummarizerKind::None, _) => AnySummarizer::None(NoSummarizer),
  })
}

async fn build_coordinator(cfg: &AppConfig) -> Result<Coordinator> {
  let pipeline = IngestionPipeline::new(
    Arc::new(open_store(cfg).await?),
    Arc::new(build_source(cfg)?),
    Arc::new(build_summarizer(cfg)?),
    Arc::new(SystemClock),
    Fingerprinter::new(&cfg.fingerprint),
    cfg.batch.pipeline_config(),
  );
  Ok(BatchCoordinator::new(Arc::new(pipeline), cfg.batch.concurrency))
}

/// A token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
  let token = CancellationToken::new();
  let child = token.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received; finishing in-flight products");
      child.cancel();
    }
  });
  token
}

// ─── run ──────────────────────────────────────────────────────────────────────

pub async fn run(cfg: &AppConfig, slugs: Vec<String>, json: bool) -> Result<()> {
  let coordinator = build_coordinator(cfg).await?;
  let cancel = cancel_on_ctrl_c();

  let report = coordinator
    .run_batch(&ProductSelector::from_slugs(slugs), &cancel)
    .await
    .context("batch aborted")?;

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print_report(&report);
  }
  Ok(())
}

fn print_report(report: &BatchReport) {
  for result in &report.results {
    let retry = if result.retryable { " (will retry)" } else { "" };
    println!(
      "{:<24} {:<20} {}{retry}",
      result.product_slug,
      result.outcome.as_ref(),
      result.detail
    );
  }
  let c = &report.counts;
  println!(
    "\n{} selected: {} accepted, {} duplicate, {} daily limit, {} failed, {} not found ({} ms)",
    report.total_selected,
    c.accepted,
    c.skipped_duplicate,
    c.skipped_daily_limit,
    c.failed,
    c.not_found,
    report.duration_ms,
  );
  if report.cancelled {
    println!("cancelled: {} products not started", report.not_started);
  }
}

// ─── seed / products ──────────────────────────────────────────────────────────

pub async fn seed(cfg: &AppConfig) -> Result<()> {
  if cfg.products.is_empty() {
    bail!("no [[products]] entries in configuration");
  }
  let store = open_store(cfg).await?;
  for input in &cfg.products {
    let product = store
      .upsert_product(input.clone())
      .await
      .with_context(|| format!("failed to seed {}", input.slug))?;
    info!(product = %product.slug, status = %product.status, "seeded");
  }
  println!("seeded {} products", cfg.products.len());
  Ok(())
}

pub async fn products(cfg: &AppConfig, active_only: bool) -> Result<()> {
  let store = open_store(cfg).await?;
  for product in store.list_products(active_only).await? {
    let last = match &product.last_crawl {
      Some(crawl) => format!("{} at {}", crawl.outcome, crawl.at.format("%Y-%m-%d %H:%M")),
      None => "never crawled".to_owned(),
    };
    println!("{:<24} {:<9} {:<32} {last}", product.slug, product.status.as_ref(), product.name);
  }
  Ok(())
}

// ─── updates ──────────────────────────────────────────────────────────────────

pub async fn updates(cfg: &AppConfig, slug: &str, limit: usize, json: bool) -> Result<()> {
  let store = open_store(cfg).await?;
  if store.get_product(slug).await?.is_none() {
    bail!("no tracked product with slug {slug:?}");
  }
  let records = store.recent_updates(slug, limit).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&records)?);
    return Ok(());
  }
  for record in &records {
    println!(
      "{}  [{}]  {}  ({})",
      record.published_at.format("%Y-%m-%d"),
      record.importance,
      record.title,
      record.fingerprint.short()
    );
    if let Some(summary) = &record.summary {
      println!("    {summary}");
    }
  }
  Ok(())
}

// ─── rebuild-ledger ───────────────────────────────────────────────────────────

pub async fn rebuild_ledger(cfg: &AppConfig) -> Result<()> {
  let store = open_store(cfg).await?;
  let entries = store.rebuild_ledger().await?;
  println!("ledger rebuilt: {entries} entries");
  Ok(())
}

// ─── serve ────────────────────────────────────────────────────────────────────

pub async fn serve(cfg: &AppConfig) -> Result<()> {
  let coordinator = Arc::new(build_coordinator(cfg).await?);
  let shutdown = CancellationToken::new();

  let app = api_router(ApiState::new(coordinator, shutdown.clone())).layer(TraceLayer::new_for_http());
  let address = cfg.address();

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
      }
      shutdown.cancel();
    })
    .await
    .context("server error")?;

  Ok(())
}
