//! Postgres-backed list store via direct SQLx.
//!
//! Lists are rows in `list_entries` ordered by a per-list position column;
//! counters live in `counters`. Mutations run in a transaction serialized per
//! list with `pg_advisory_xact_lock`, which is what makes each contract
//! operation atomic. Pushes `pg_notify` the `list_push` channel so blocked
//! movers wake without tight polling.

use super::{ListStore, resolve_range};
use crate::error::Result;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Channel notified whenever a value is pushed onto any list.
const PUSH_CHANNEL: &str = "list_push";

/// A [`ListStore`] backed by Postgres.
pub struct PgStore {
    pool: PgPool,
    listener: Mutex<PgListener>,
    poll_interval: Duration,
}

impl PgStore {
    /// Connect to Postgres and set up the notification listener.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(PUSH_CHANNEL).await?;
        Ok(Self {
            pool,
            listener: Mutex::new(listener),
            poll_interval: Duration::from_secs(5),
        })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Poll fallback used when no NOTIFY arrives (missed wakeups, dropped
    /// listener connections).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Single move attempt: delete the head of `src`, insert it at the head
    /// of `dst`, all in one serialized transaction.
    async fn try_move(&self, src: &str, dst: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        // Lock both lists in a stable order so concurrent movers never deadlock.
        let (first, second) = if src <= dst { (src, dst) } else { (dst, src) };
        lock_list(&mut tx, first).await?;
        if first != second {
            lock_list(&mut tx, second).await?;
        }

        let moved: Option<(String,)> = sqlx::query_as(
            "WITH head AS (
                 SELECT ctid FROM list_entries WHERE list = $1 ORDER BY pos LIMIT 1
             ),
             popped AS (
                 DELETE FROM list_entries WHERE ctid IN (SELECT ctid FROM head)
                 RETURNING value
             )
             INSERT INTO list_entries (list, pos, value)
             SELECT $2,
                    COALESCE((SELECT MIN(pos) FROM list_entries WHERE list = $2), 0) - 1,
                    value
             FROM popped
             RETURNING value",
        )
        .bind(src)
        .bind(dst)
        .fetch_optional(&mut *tx)
        .await?;

        if moved.is_some() {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(PUSH_CHANNEL)
                .bind(dst)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        metrics::store_operations().add(
            1,
            &[
                KeyValue::new("list", src.to_string()),
                KeyValue::new(
                    "operation",
                    if moved.is_some() { "move" } else { "move_empty" },
                ),
            ],
        );

        Ok(moved.map(|(value,)| value))
    }

    async fn push(&self, list: &str, value: &str, front: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        lock_list(&mut tx, list).await?;

        let sql = if front {
            "INSERT INTO list_entries (list, pos, value)
             SELECT $1, COALESCE(MIN(pos), 0) - 1, $2 FROM list_entries WHERE list = $1"
        } else {
            "INSERT INTO list_entries (list, pos, value)
             SELECT $1, COALESCE(MAX(pos), 0) + 1, $2 FROM list_entries WHERE list = $1"
        };
        sqlx::query(sql)
            .bind(list)
            .bind(value)
            .execute(&mut *tx)
            .await?;

        let (len,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM list_entries WHERE list = $1")
            .bind(list)
            .fetch_one(&mut *tx)
            .await?;

        // Transactional — blocked movers only wake once the value is visible.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(PUSH_CHANNEL)
            .bind(list)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        metrics::store_operations().add(
            1,
            &[
                KeyValue::new("list", list.to_string()),
                KeyValue::new("operation", if front { "prepend" } else { "append" }),
            ],
        );

        Ok(len as u64)
    }
}

async fn lock_list(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, list: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(list)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl ListStore for PgStore {
    async fn append(&self, list: &str, value: &str) -> Result<u64> {
        self.push(list, value, false).await
    }

    async fn prepend(&self, list: &str, value: &str) -> Result<u64> {
        self.push(list, value, true).await
    }

    async fn move_blocking(
        &self,
        src: &str,
        dst: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(value) = self.try_move(src, dst).await? {
                return Ok(Some(value));
            }

            let mut wait = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                wait = wait.min(deadline - now);
            }

            // Wait for a push notification, falling back to the poll interval.
            // Notifications carry the pushed list's name but any push re-checks;
            // a spurious wakeup just costs one empty move attempt.
            let mut listener = self.listener.lock().await;
            match tokio::time::timeout(wait, listener.recv()).await {
                Ok(Ok(_notification)) => {}
                Ok(Err(e)) => {
                    warn!("listener error: {e}, falling back to poll");
                    drop(listener);
                    tokio::time::sleep(wait).await;
                }
                Err(_elapsed) => {}
            }
        }
    }

    async fn remove_value(&self, list: &str, value: &str, count: u64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        lock_list(&mut tx, list).await?;

        let removed = sqlx::query(
            "WITH victims AS (
                 SELECT ctid FROM list_entries
                 WHERE list = $1 AND value = $2
                 ORDER BY pos LIMIT $3
             )
             DELETE FROM list_entries WHERE ctid IN (SELECT ctid FROM victims)",
        )
        .bind(list)
        .bind(value)
        .bind(count as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        metrics::store_operations().add(
            1,
            &[
                KeyValue::new("list", list.to_string()),
                KeyValue::new("operation", "remove"),
            ],
        );

        Ok(removed)
    }

    async fn trim_front(&self, list: &str, keep: u64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_list(&mut tx, list).await?;

        sqlx::query(
            "WITH kept AS (
                 SELECT ctid FROM list_entries WHERE list = $1 ORDER BY pos LIMIT $2
             )
             DELETE FROM list_entries
             WHERE list = $1 AND ctid NOT IN (SELECT ctid FROM kept)",
        )
        .bind(list)
        .bind(keep as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        metrics::store_operations().add(
            1,
            &[
                KeyValue::new("list", list.to_string()),
                KeyValue::new("operation", "trim"),
            ],
        );

        Ok(())
    }

    async fn increment(&self, counter: &str) -> Result<i64> {
        let (value,): (i64,) = sqlx::query_as(
            "INSERT INTO counters (name, value) VALUES ($1, 1)
             ON CONFLICT (name) DO UPDATE SET value = counters.value + 1
             RETURNING value",
        )
        .bind(counter)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let (len,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM list_entries WHERE list = $1")
            .bind(list)
            .fetch_one(&self.pool)
            .await?;

        let Some((start, stop)) = resolve_range(len as usize, start, stop) else {
            return Ok(Vec::new());
        };

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT value FROM list_entries WHERE list = $1
             ORDER BY pos OFFSET $2 LIMIT $3",
        )
        .bind(list)
        .bind(start as i64)
        .bind((stop - start + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(value,)| value).collect())
    }
}
