//! Integration tests for `SqliteStore` against in-memory and temporary-file
//! databases.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use patchnote_core::{
  batch::{BatchCoordinator, OutcomeKind, ProductSelector},
  candidate::UpdateCandidate,
  clock::FixedClock,
  fingerprint::{Fingerprint, Fingerprinter},
  pipeline::{IngestionPipeline, PipelineConfig},
  product::{CrawlOutcome, LastCrawl, NewProduct, ProductStatus, TrackedProduct},
  record::{Importance, NewUpdateRecord},
  source::{ChangelogSource, SourceError},
  store::{CommitOutcome, UpdateStore},
  summary::NoSummarizer,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  let s = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store");
  s.upsert_product(NewProduct::new("cursor", "Cursor")).await.unwrap();
  s
}

fn at(day: u32, hour: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 7, day, hour, 0, 0).unwrap() }

fn fingerprint_of(body: &str) -> Fingerprint {
  Fingerprinter::default()
    .fingerprint_candidate("cursor", &UpdateCandidate::new("Cursor", body))
    .unwrap()
    .1
}

fn record(body: &str, ingested_at: DateTime<Utc>) -> NewUpdateRecord {
  NewUpdateRecord {
    product_slug: "cursor".into(),
    title:        format!("Cursor: {body}"),
    summary:      None,
    key_points:   None,
    importance:   Importance::Medium,
    tags:         BTreeSet::from(["scraped".to_owned()]),
    version:      None,
    published_at: ingested_at,
    fingerprint:  fingerprint_of(body),
    source_url:   Some("https://cursor.com/changelog".into()),
    confidence:   0.5,
    ingested_at,
  }
}

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2025, 7, d).unwrap() }

struct TempDb(PathBuf);

impl TempDb {
  fn new() -> Self {
    Self(std::env::temp_dir().join(format!("patchnote-test-{}.db", Uuid::new_v4())))
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    for suffix in ["", "-wal", "-shm"] {
      let _ = std::fs::remove_file(format!("{}{suffix}", self.0.display()));
    }
  }
}

// ─── Products ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_and_get_product() {
  let s = store().await;

  let fetched = s.get_product("cursor").await.unwrap().unwrap();
  assert_eq!(fetched.name, "Cursor");
  assert_eq!(fetched.status, ProductStatus::Active);
  assert!(fetched.last_crawl.is_none());

  assert!(s.get_product("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_rejects_invalid_slug() {
  let s = store().await;
  let err = s
    .upsert_product(NewProduct::new("Not A Slug", "Bad"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(patchnote_core::Error::InvalidSlug(_))));
}

#[tokio::test]
async fn upsert_preserves_created_at_and_last_crawl() {
  let s = store().await;
  let original = s.get_product("cursor").await.unwrap().unwrap();
  s.record_crawl("cursor", LastCrawl::failure(at(3, 9), "HTTP 503"))
    .await
    .unwrap();

  let updated = s
    .upsert_product(
      NewProduct::new("cursor", "Cursor IDE").with_changelog_url("https://cursor.com/changelog"),
    )
    .await
    .unwrap();

  assert_eq!(updated.name, "Cursor IDE");
  assert_eq!(updated.changelog_url.as_deref(), Some("https://cursor.com/changelog"));
  assert_eq!(updated.created_at, original.created_at);
  let crawl = updated.last_crawl.unwrap();
  assert_eq!(crawl.outcome, CrawlOutcome::Failure);
  assert_eq!(crawl.error.as_deref(), Some("HTTP 503"));
  assert_eq!(crawl.at, at(3, 9));
}

#[tokio::test]
async fn list_products_sorted_and_filtered() {
  let s = store().await;
  s.upsert_product(NewProduct::new("zed", "Zed")).await.unwrap();
  s.upsert_product(NewProduct::new("aider", "Aider")).await.unwrap();
  assert!(s.set_product_status("zed", ProductStatus::Inactive).await.unwrap());
  assert!(!s.set_product_status("ghost", ProductStatus::Inactive).await.unwrap());

  let all: Vec<String> = s
    .list_products(false)
    .await
    .unwrap()
    .into_iter()
    .map(|p| p.slug)
    .collect();
  assert_eq!(all, ["aider", "cursor", "zed"]);

  let active: Vec<TrackedProduct> = s.list_products(true).await.unwrap();
  assert_eq!(active.len(), 2);
  assert!(active.iter().all(|p| p.status.is_active()));
}

#[tokio::test]
async fn record_crawl_on_unknown_product_fails() {
  let s = store().await;
  let err = s
    .record_crawl("ghost", LastCrawl::success(at(3, 9)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ProductNotFound(slug) if slug == "ghost"));
}

// ─── Commit ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commit_inserts_record_and_ledger_entry() {
  let s = store().await;
  let input = record("planning", at(3, 9));
  let fp = input.fingerprint.clone();

  let outcome = s.commit_update(input).await.unwrap();
  let CommitOutcome::Inserted(inserted) = outcome else {
    panic!("expected insert, got {outcome:?}");
  };

  assert!(s.has_fingerprint("cursor", &fp).await.unwrap());
  assert!(s.has_any_on_day("cursor", day(3)).await.unwrap());
  assert!(!s.has_any_on_day("cursor", day(4)).await.unwrap());
  assert_eq!(s.latest_fingerprint("cursor").await.unwrap(), Some(fp));

  let stored = s.recent_updates("cursor", 5).await.unwrap();
  assert_eq!(stored, vec![inserted]);
}

#[tokio::test]
async fn commit_round_trips_every_field() {
  let s = store().await;
  let mut input = record("planning", at(3, 9));
  input.summary = Some("Agents plan first".into());
  input.key_points = Some(vec!["To-dos".into(), "Queue".into()]);
  input.importance = Importance::High;
  input.version = Some("1.2".into());
  input.tags.insert("versioned".into());
  input.published_at = at(1, 12);
  input.confidence = 0.875;

  let CommitOutcome::Inserted(inserted) = s.commit_update(input).await.unwrap() else {
    panic!("expected insert");
  };
  let stored = &s.recent_updates("cursor", 1).await.unwrap()[0];
  assert_eq!(stored, &inserted);
  assert_eq!(stored.tags.iter().collect::<Vec<_>>(), ["scraped", "versioned"]);
}

#[tokio::test]
async fn commit_rejects_duplicates_across_days() {
  let s = store().await;
  s.commit_update(record("planning", at(3, 9))).await.unwrap();

  let again = s.commit_update(record("planning", at(9, 9))).await.unwrap();
  assert_eq!(again, CommitOutcome::DuplicateFingerprint);
  assert_eq!(s.count_updates("cursor").await.unwrap(), 1);
}

#[tokio::test]
async fn commit_enforces_one_update_per_day() {
  let s = store().await;
  s.commit_update(record("planning", at(3, 1))).await.unwrap();

  let same_day = s.commit_update(record("hotfix", at(3, 23))).await.unwrap();
  assert_eq!(same_day, CommitOutcome::DailyLimitReached);

  let next_day = s.commit_update(record("hotfix", at(4, 0))).await.unwrap();
  assert!(matches!(next_day, CommitOutcome::Inserted(_)));
  assert_eq!(s.count_updates("cursor").await.unwrap(), 2);
}

#[tokio::test]
async fn commit_for_unknown_product_fails() {
  let s = store().await;
  let mut input = record("planning", at(3, 9));
  input.product_slug = "ghost".into();
  let err = s.commit_update(input).await.unwrap_err();
  assert!(matches!(err, Error::ProductNotFound(_)));
}

#[tokio::test]
async fn concurrent_commits_for_one_day_accept_once() {
  let s = store().await;
  let handles: Vec<_> = ["a", "b", "c", "d"]
    .into_iter()
    .map(|body| {
      let s = s.clone();
      tokio::spawn(async move { s.commit_update(record(body, at(3, 9))).await.unwrap() })
    })
    .collect();

  let mut inserted = 0;
  for handle in handles {
    if matches!(handle.await.unwrap(), CommitOutcome::Inserted(_)) {
      inserted += 1;
    }
  }
  assert_eq!(inserted, 1);
  assert_eq!(s.count_updates("cursor").await.unwrap(), 1);
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn recent_updates_in_display_order_with_limit() {
  let s = store().await;
  let mut older = record("one", at(3, 9));
  older.published_at = at(1, 0);
  let mut tie_first = record("two", at(4, 9));
  tie_first.published_at = at(2, 0);
  let mut tie_second = record("three", at(5, 9));
  tie_second.published_at = at(2, 0);
  for r in [older, tie_first, tie_second] {
    s.commit_update(r).await.unwrap();
  }

  let titles: Vec<String> = s
    .recent_updates("cursor", 2)
    .await
    .unwrap()
    .into_iter()
    .map(|r| r.title)
    .collect();
  assert_eq!(titles, ["Cursor: three", "Cursor: two"]);
}

#[tokio::test]
async fn latest_fingerprint_follows_ingestion_time() {
  let s = store().await;
  assert_eq!(s.latest_fingerprint("cursor").await.unwrap(), None);

  s.commit_update(record("one", at(3, 9))).await.unwrap();
  s.commit_update(record("two", at(4, 9))).await.unwrap();
  assert_eq!(s.latest_fingerprint("cursor").await.unwrap(), Some(fingerprint_of("two")));
}

// ─── Ledger rebuild ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ledger_is_rebuilt_from_records() {
  let db = TempDb::new();
  {
    let s = SqliteStore::open(&db.0).await.unwrap();
    s.upsert_product(NewProduct::new("cursor", "Cursor")).await.unwrap();
    s.commit_update(record("one", at(3, 9))).await.unwrap();
    s.commit_update(record("two", at(4, 9))).await.unwrap();
  }

  // Lose the derived table entirely.
  {
    let raw = rusqlite::Connection::open(&db.0).unwrap();
    raw.execute("DELETE FROM ledger", []).unwrap();
  }

  let s = SqliteStore::open(&db.0).await.unwrap();
  assert!(!s.has_fingerprint("cursor", &fingerprint_of("one")).await.unwrap());

  assert_eq!(s.rebuild_ledger().await.unwrap(), 2);
  assert!(s.has_fingerprint("cursor", &fingerprint_of("one")).await.unwrap());
  assert!(s.has_any_on_day("cursor", day(4)).await.unwrap());
  assert_eq!(s.latest_fingerprint("cursor").await.unwrap(), Some(fingerprint_of("two")));

  // Rebuilding twice changes nothing.
  assert_eq!(s.rebuild_ledger().await.unwrap(), 2);
}

#[tokio::test]
async fn data_survives_reopen() {
  let db = TempDb::new();
  {
    let s = SqliteStore::open(&db.0).await.unwrap();
    s.upsert_product(NewProduct::new("cursor", "Cursor")).await.unwrap();
    s.commit_update(record("one", at(3, 9))).await.unwrap();
  }

  let s = SqliteStore::open(&db.0).await.unwrap();
  assert_eq!(s.count_updates("cursor").await.unwrap(), 1);
  assert_eq!(
    s.commit_update(record("one", at(8, 9))).await.unwrap(),
    CommitOutcome::DuplicateFingerprint
  );
}

#[tokio::test]
async fn busy_writer_resolves_from_the_ledger() {
  let db = TempDb::new();
  let s = SqliteStore::open(&db.0).await.unwrap();
  s.set_busy_timeout(Duration::from_millis(50)).await.unwrap();
  s.upsert_product(NewProduct::new("cursor", "Cursor")).await.unwrap();
  s.commit_update(record("one", at(3, 9))).await.unwrap();

  // Another process takes the write lock and keeps it.
  let raw = rusqlite::Connection::open(&db.0).unwrap();
  raw.execute_batch("BEGIN IMMEDIATE").unwrap();

  assert_eq!(
    s.commit_update(record("one", at(5, 9))).await.unwrap(),
    CommitOutcome::DuplicateFingerprint
  );
  assert_eq!(
    s.commit_update(record("two", at(3, 18))).await.unwrap(),
    CommitOutcome::DailyLimitReached
  );
  assert_eq!(s.commit_update(record("three", at(6, 9))).await.unwrap(), CommitOutcome::Busy);
  assert!(!s.has_any_on_day("cursor", day(6)).await.unwrap());

  raw.execute_batch("ROLLBACK").unwrap();
  assert!(matches!(
    s.commit_update(record("three", at(6, 9))).await.unwrap(),
    CommitOutcome::Inserted(_)
  ));
  assert_eq!(s.count_updates("cursor").await.unwrap(), 2);
}

// ─── End to end ──────────────────────────────────────────────────────────────

struct FixedSource(UpdateCandidate);

impl ChangelogSource for FixedSource {
  async fn fetch_candidate(&self, _product: &TrackedProduct) -> Result<UpdateCandidate, SourceError> {
    Ok(self.0.clone())
  }
}

#[tokio::test]
async fn batch_over_sqlite_is_idempotent() {
  let s = Arc::new(store().await);
  let pipeline = IngestionPipeline::new(
    s.clone(),
    Arc::new(FixedSource(UpdateCandidate::new(
      "Cursor 1.2",
      "Agent planning and queued messages",
    ))),
    Arc::new(NoSummarizer),
    Arc::new(FixedClock::new(at(3, 9))),
    Fingerprinter::default(),
    PipelineConfig::default(),
  );
  let coordinator = BatchCoordinator::new(Arc::new(pipeline), 2);
  let cancel = CancellationToken::new();

  let first = coordinator.run_batch(&ProductSelector::AllActive, &cancel).await.unwrap();
  assert_eq!(first.results[0].outcome, OutcomeKind::Accepted);

  let second = coordinator.run_batch(&ProductSelector::AllActive, &cancel).await.unwrap();
  assert_eq!(second.results[0].outcome, OutcomeKind::SkippedDuplicate);
  assert_eq!(s.count_updates("cursor").await.unwrap(), 1);

  let product = s.get_product("cursor").await.unwrap().unwrap();
  assert_eq!(product.last_crawl, Some(LastCrawl::success(at(3, 9))));
}
