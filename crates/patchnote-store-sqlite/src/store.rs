//! [`SqliteStore`]: the SQLite implementation of [`UpdateStore`].

use std::{path::Path, time::Duration};

use chrono::{NaiveDate, Utc};
use rusqlite::{ErrorCode, OptionalExtension as _, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use patchnote_core::{
  fingerprint::Fingerprint,
  product::{LastCrawl, NewProduct, ProductStatus, TrackedProduct},
  record::{NewUpdateRecord, UpdateRecord},
  store::{CommitOutcome, UpdateStore},
};

use crate::{
  Error,
  Result,
  encode::{
    PRODUCT_COLUMNS,
    RECORD_COLUMNS,
    RawProduct,
    RawRecord,
    encode_day,
    encode_dt,
    encode_key_points,
    encode_tags,
    encode_uuid,
  },
  schema::SCHEMA,
};

/// What the commit transaction decided, before decoding.
enum CommitStep {
  Inserted,
  Duplicate,
  DailyLimit,
  MissingProduct,
  /// The write lock stayed taken past the busy timeout.
  Busy,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A patchnote store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests and dry runs.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// How long a write waits for another connection's lock before giving up.
  pub async fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(timeout)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn exists(&self, sql: &'static str, slug: &str, key: String) -> Result<bool> {
    let slug = slug.to_owned();
    let found = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(sql, rusqlite::params![slug, key], |row| row.get::<_, bool>(0))?)
      })
      .await?;
    Ok(found)
  }

  /// Another writer held the lock; WAL readers still see its committed
  /// rows, so a lost race can be told apart from plain contention.
  async fn recheck_after_busy(&self, record: &UpdateRecord) -> Result<CommitOutcome> {
    let slug = &record.product_slug;
    let outcome = if self.has_fingerprint(slug, &record.fingerprint).await? {
      CommitOutcome::DuplicateFingerprint
    } else if self.has_any_on_day(slug, record.ledger_day()).await? {
      CommitOutcome::DailyLimitReached
    } else {
      CommitOutcome::Busy
    };
    warn!(product = %slug, ?outcome, "write lock busy; resolved from the ledger");
    Ok(outcome)
  }
}

// ─── UpdateStore impl ────────────────────────────────────────────────────────

impl UpdateStore for SqliteStore {
  type Error = Error;

  // ── Products ──────────────────────────────────────────────────────────────

  async fn upsert_product(&self, input: NewProduct) -> Result<TrackedProduct> {
    input.validate()?;

    let created_at = encode_dt(Utc::now());
    let status = input.status.as_ref().to_owned();

    let raw: RawProduct = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO products (slug, name, homepage, changelog_url, status, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(slug) DO UPDATE SET
             name          = excluded.name,
             homepage      = excluded.homepage,
             changelog_url = excluded.changelog_url,
             status        = excluded.status",
          rusqlite::params![
            input.slug,
            input.name,
            input.homepage,
            input.changelog_url,
            status,
            created_at,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = ?1"),
          rusqlite::params![input.slug],
          RawProduct::from_row,
        )?)
      })
      .await?;

    raw.into_product()
  }

  async fn get_product(&self, slug: &str) -> Result<Option<TrackedProduct>> {
    let slug = slug.to_owned();

    let raw: Option<RawProduct> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = ?1"),
              rusqlite::params![slug],
              RawProduct::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawProduct::into_product).transpose()
  }

  async fn list_products(&self, active_only: bool) -> Result<Vec<TrackedProduct>> {
    let raws: Vec<RawProduct> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PRODUCT_COLUMNS} FROM products
           WHERE (?1 = 0 OR status = 'active')
           ORDER BY slug"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![active_only], RawProduct::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProduct::into_product).collect()
  }

  async fn set_product_status(&self, slug: &str, status: ProductStatus) -> Result<bool> {
    let slug = slug.to_owned();
    let status = status.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE products SET status = ?2 WHERE slug = ?1",
          rusqlite::params![slug, status],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn record_crawl(&self, slug: &str, crawl: LastCrawl) -> Result<()> {
    let slug_owned = slug.to_owned();
    let at = encode_dt(crawl.at);
    let outcome = crawl.outcome.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE products
           SET last_crawl_at = ?2, last_crawl_outcome = ?3, last_crawl_error = ?4
           WHERE slug = ?1",
          rusqlite::params![slug_owned, at, outcome, crawl.error],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::ProductNotFound(slug.to_owned()));
    }
    Ok(())
  }

  // ── Ledger lookups ────────────────────────────────────────────────────────

  async fn has_fingerprint(&self, slug: &str, fingerprint: &Fingerprint) -> Result<bool> {
    self
      .exists(
        "SELECT EXISTS(SELECT 1 FROM ledger WHERE product_slug = ?1 AND fingerprint = ?2)",
        slug,
        fingerprint.as_str().to_owned(),
      )
      .await
  }

  async fn has_any_on_day(&self, slug: &str, day: NaiveDate) -> Result<bool> {
    self
      .exists(
        "SELECT EXISTS(SELECT 1 FROM ledger WHERE product_slug = ?1 AND day = ?2)",
        slug,
        encode_day(day),
      )
      .await
  }

  async fn latest_fingerprint(&self, slug: &str) -> Result<Option<Fingerprint>> {
    let slug = slug.to_owned();

    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT fingerprint FROM ledger
               WHERE product_slug = ?1
               ORDER BY recorded_at DESC, rowid DESC
               LIMIT 1",
              rusqlite::params![slug],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(raw.map(|s| s.parse::<Fingerprint>()).transpose()?)
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn commit_update(&self, input: NewUpdateRecord) -> Result<CommitOutcome> {
    let record = input.into_record(Uuid::new_v4());

    let record_id    = encode_uuid(record.record_id);
    let slug         = record.product_slug.clone();
    let title        = record.title.clone();
    let summary      = record.summary.clone();
    let key_points   = encode_key_points(record.key_points.as_ref())?;
    let importance   = record.importance.as_ref().to_owned();
    let tags         = encode_tags(&record.tags)?;
    let version      = record.version.clone();
    let published_at = encode_dt(record.published_at);
    let fingerprint  = record.fingerprint.as_str().to_owned();
    let source_url   = record.source_url.clone();
    let confidence   = record.confidence;
    let ingested_at  = encode_dt(record.ingested_at);
    let day          = encode_day(record.ledger_day());

    // IMMEDIATE takes the write lock up front, so the checks and the inserts
    // see no interleaved writer.
    let step = self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
          Ok(tx) => tx,
          Err(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
          {
            return Ok(CommitStep::Busy);
          }
          Err(e) => return Err(e.into()),
        };

        let product_known: bool = tx.query_row(
          "SELECT EXISTS(SELECT 1 FROM products WHERE slug = ?1)",
          rusqlite::params![slug],
          |row| row.get(0),
        )?;
        if !product_known {
          return Ok(CommitStep::MissingProduct);
        }

        let duplicate: bool = tx.query_row(
          "SELECT EXISTS(SELECT 1 FROM ledger WHERE product_slug = ?1 AND fingerprint = ?2)",
          rusqlite::params![slug, fingerprint],
          |row| row.get(0),
        )?;
        if duplicate {
          return Ok(CommitStep::Duplicate);
        }

        let day_taken: bool = tx.query_row(
          "SELECT EXISTS(SELECT 1 FROM ledger WHERE product_slug = ?1 AND day = ?2)",
          rusqlite::params![slug, day],
          |row| row.get(0),
        )?;
        if day_taken {
          return Ok(CommitStep::DailyLimit);
        }

        tx.execute(
          "INSERT INTO update_records (
             record_id, product_slug, title, summary, key_points, importance, tags,
             version, published_at, fingerprint, source_url, confidence,
             ingested_at, ingest_day
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
          rusqlite::params![
            record_id,
            slug,
            title,
            summary,
            key_points,
            importance,
            tags,
            version,
            published_at,
            fingerprint,
            source_url,
            confidence,
            ingested_at,
            day,
          ],
        )?;
        tx.execute(
          "INSERT INTO ledger (product_slug, fingerprint, day, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![slug, fingerprint, day, ingested_at],
        )?;
        tx.commit()?;
        Ok(CommitStep::Inserted)
      })
      .await?;

    match step {
      CommitStep::Inserted => Ok(CommitOutcome::Inserted(record)),
      CommitStep::Duplicate => Ok(CommitOutcome::DuplicateFingerprint),
      CommitStep::DailyLimit => Ok(CommitOutcome::DailyLimitReached),
      CommitStep::MissingProduct => Err(Error::ProductNotFound(record.product_slug)),
      CommitStep::Busy => self.recheck_after_busy(&record).await,
    }
  }

  async fn rebuild_ledger(&self) -> Result<usize> {
    let entries = self
      .conn
      .call(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM ledger", [])?;
        let inserted = tx.execute(
          "INSERT OR IGNORE INTO ledger (product_slug, fingerprint, day, recorded_at)
           SELECT product_slug, fingerprint, ingest_day, ingested_at
           FROM update_records
           ORDER BY ingested_at",
          [],
        )?;
        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    info!(entries, "ledger rebuilt from update records");
    Ok(entries)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn recent_updates(&self, slug: &str, limit: usize) -> Result<Vec<UpdateRecord>> {
    let slug = slug.to_owned();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM update_records
           WHERE product_slug = ?1
           ORDER BY published_at DESC, ingested_at DESC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![slug, limit], RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn count_updates(&self, slug: &str) -> Result<usize> {
    let slug = slug.to_owned();

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM update_records WHERE product_slug = ?1",
          rusqlite::params![slug],
          |row| row.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(count).unwrap_or_default())
  }
}
