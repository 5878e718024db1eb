//! SQLite header store for ChainAccum.
//!
//! Persists the canonical header chain and every accumulator's serialized
//! objects to a single SQLite file. Each trait method runs in one transaction,
//! so a failed reconcile leaves the stored chain untouched.
//!
//! # Usage
//! ```rust,no_run
//! use chainaccum_storage::sqlite::SqliteHeaderStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteHeaderStore::open("./accum.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteHeaderStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use chainaccum_core::reorg::{plan_reconcile, LocalWindow};
use chainaccum_core::{
    Accumulator, AccumulatorObject, BlockHash, Header, HeaderStore, Headers, IndexerError,
    UpgradeFork,
};

fn storage(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed [`HeaderStore`].
pub struct SqliteHeaderStore {
    pool: SqlitePool,
}

impl SqliteHeaderStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./accum.db"`) or a full
    /// SQLite URL (`"sqlite:./accum.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage)?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(url = %url, "sqlite header store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every in-memory connection is its own database, so the pool holds one.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS headers (
                number      INTEGER PRIMARY KEY,
                block_hash  BLOB    NOT NULL,
                parent_hash BLOB    NOT NULL,
                finalized   INTEGER NOT NULL,
                fork        TEXT    NOT NULL,
                is_upgrade  INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        // One row per (accumulator, height); the hash pins it to a branch.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS objects (
                accumulator TEXT    NOT NULL,
                number      INTEGER NOT NULL,
                block_hash  BLOB    NOT NULL,
                fork        TEXT    NOT NULL,
                data        BLOB    NOT NULL,
                PRIMARY KEY (accumulator, number)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_number ON objects (number);")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(())
    }

    /// Number of headers currently held.
    pub async fn header_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM headers")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage)?;
        Ok(cnt as u64)
    }
}

// ─── Row helpers ──────────────────────────────────────────────────────────────

fn hash_column(row: &SqliteRow, column: &str) -> Result<BlockHash, IndexerError> {
    let bytes: Vec<u8> = row.try_get(column).map_err(storage)?;
    bytes
        .try_into()
        .map_err(|_| IndexerError::Storage(format!("column {column} is not a 32-byte hash")))
}

fn header_from_row(row: &SqliteRow) -> Result<Header, IndexerError> {
    let number: i64 = row.try_get("number").map_err(storage)?;
    let finalized: bool = row.try_get("finalized").map_err(storage)?;
    let fork: String = row.try_get("fork").map_err(storage)?;
    let is_upgrade: bool = row.try_get("is_upgrade").map_err(storage)?;
    Ok(Header::new(
        number as u64,
        hash_column(row, "block_hash")?,
        hash_column(row, "parent_hash")?,
    )
    .with_finalized(finalized)
    .with_fork(UpgradeFork::new(fork), is_upgrade))
}

async fn latest_header(
    conn: &mut SqliteConnection,
    finalized: bool,
) -> Result<Header, IndexerError> {
    let sql = if finalized {
        "SELECT * FROM headers WHERE finalized = 1 ORDER BY number DESC LIMIT 1"
    } else {
        "SELECT * FROM headers ORDER BY number DESC LIMIT 1"
    };
    let row = sqlx::query(sql)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or(IndexerError::NoHeaders)?;
    header_from_row(&row)
}

async fn header_at(
    conn: &mut SqliteConnection,
    number: u64,
) -> Result<Option<Header>, IndexerError> {
    let row = sqlx::query("SELECT * FROM headers WHERE number = ?")
        .bind(number as i64)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?;
    row.as_ref().map(header_from_row).transpose()
}

/// The stored header matching `header` by height and hash.
async fn canonical(
    conn: &mut SqliteConnection,
    header: &Header,
) -> Result<Option<Header>, IndexerError> {
    Ok(header_at(conn, header.number)
        .await?
        .filter(|h| h.equals(header)))
}

async fn object_at_or_before(
    conn: &mut SqliteConnection,
    header: &Header,
    accumulator: &dyn Accumulator,
) -> Result<(AccumulatorObject, Header), IndexerError> {
    if canonical(conn, header).await?.is_none() {
        return Err(IndexerError::NotFound);
    }

    let row = sqlx::query(
        "SELECT number, block_hash, fork, data FROM objects
         WHERE accumulator = ? AND number <= ?
         ORDER BY number DESC LIMIT 1",
    )
    .bind(accumulator.name())
    .bind(header.number as i64)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage)?
    .ok_or(IndexerError::NotFound)?;

    let number: i64 = row.try_get("number").map_err(storage)?;
    let block_hash = hash_column(&row, "block_hash")?;
    let fork: String = row.try_get("fork").map_err(storage)?;
    let data: Vec<u8> = row.try_get("data").map_err(storage)?;

    let attached_to = header_at(conn, number as u64)
        .await?
        .filter(|h| h.block_hash == block_hash)
        .ok_or(IndexerError::NotFound)?;
    let object = accumulator.deserialize_object(&data, &UpgradeFork::new(fork))?;
    Ok((object, attached_to))
}

// ─── HeaderStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl HeaderStore for SqliteHeaderStore {
    async fn add_headers(&self, headers: &Headers) -> Result<Headers, IndexerError> {
        let (Some(first), Some(last)) = (headers.first(), headers.last()) else {
            return Ok(Headers::default());
        };

        let mut tx = self.pool.begin().await.map_err(storage)?;

        let bounds = sqlx::query("SELECT MIN(number) AS lo, MAX(number) AS hi FROM headers")
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let lo: Option<i64> = bounds.try_get("lo").map_err(storage)?;
        let hi: Option<i64> = bounds.try_get("hi").map_err(storage)?;
        let window = match (lo, hi) {
            (Some(lo), Some(hi)) => Some(LocalWindow {
                earliest: lo as u64,
                tip: hi as u64,
            }),
            _ => None,
        };

        // Every height the planner can ask about: the batch plus one parent.
        let rows = sqlx::query("SELECT number, block_hash FROM headers WHERE number BETWEEN ? AND ?")
            .bind(first.number.saturating_sub(1) as i64)
            .bind(last.number as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;
        let mut held = HashMap::with_capacity(rows.len());
        for row in &rows {
            let number: i64 = row.try_get("number").map_err(storage)?;
            held.insert(number as u64, hash_column(row, "block_hash")?);
        }

        let plan = plan_reconcile(headers, window, |n| held.get(&n).copied())?;

        for header in headers.iter().take(plan.known) {
            sqlx::query(
                "UPDATE headers SET finalized = ?, fork = ?, is_upgrade = ?
                 WHERE number = ? AND block_hash = ?",
            )
            .bind(header.finalized)
            .bind(header.current_fork.as_str())
            .bind(header.is_upgrade)
            .bind(header.number as i64)
            .bind(header.block_hash.as_slice())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        if let Some(number) = plan.rewind_to {
            sqlx::query("DELETE FROM objects WHERE number > ?")
                .bind(number as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            sqlx::query("DELETE FROM headers WHERE number > ?")
                .bind(number as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        let new_headers = plan.new_headers(headers);
        for header in new_headers.iter() {
            sqlx::query(
                "INSERT INTO headers (number, block_hash, parent_hash, finalized, fork, is_upgrade)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(header.number as i64)
            .bind(header.block_hash.as_slice())
            .bind(header.parent_hash.as_slice())
            .bind(header.finalized)
            .bind(header.current_fork.as_str())
            .bind(header.is_upgrade)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;

        debug!(
            received = headers.len(),
            added = new_headers.len(),
            rewound_to = ?plan.rewind_to,
            "headers reconciled"
        );
        Ok(new_headers)
    }

    async fn get_latest_header(&self, finalized: bool) -> Result<Header, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        latest_header(&mut conn, finalized).await
    }

    async fn attach_object(
        &self,
        object: &AccumulatorObject,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(), IndexerError> {
        let data = accumulator.serialize_object(object, &header.current_fork)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        if canonical(&mut tx, header).await?.is_none() {
            return Err(IndexerError::NotFound);
        }
        sqlx::query(
            "INSERT OR REPLACE INTO objects (accumulator, number, block_hash, fork, data)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(accumulator.name())
        .bind(header.number as i64)
        .bind(header.block_hash.as_slice())
        .bind(header.current_fork.as_str())
        .bind(data)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        debug!(accumulator = accumulator.name(), number = header.number, "object attached");
        Ok(())
    }

    async fn get_object(
        &self,
        header: &Header,
        accumulator: &dyn Accumulator,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let found = object_at_or_before(&mut tx, header, accumulator).await?;
        tx.commit().await.map_err(storage)?;
        Ok(found)
    }

    async fn get_latest_object(
        &self,
        accumulator: &dyn Accumulator,
        finalized: bool,
    ) -> Result<(AccumulatorObject, Header), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let anchor = latest_header(&mut tx, finalized).await?;
        let found = object_at_or_before(&mut tx, &anchor, accumulator).await?;
        tx.commit().await.map_err(storage)?;
        Ok(found)
    }

    async fn fast_forward(&self) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("DELETE FROM objects")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query("DELETE FROM headers")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        info!("header store fast-forwarded");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
