// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed [`DocumentStore`].
//!
//! Each logical collection is one table holding the record as JSON text, keyed
//! by its natural id:
//!
//! ```text
//! checkpoints (source_id PK, doc, updated_at)
//! metas       (doc_id PK,    doc, version, updated_at)
//! bodies      (id_rev PK,    doc_id, doc, created_at)
//! ```
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Every statement is retried with capped exponential backoff
//! before the error is surfaced. A busy error that survives those retries
//! maps to [`StoreError::Unavailable`], so the batch applier's own
//! document-level retry gets a second chance.
//!
//! # Error Mapping
//!
//! | sqlx error | StoreError |
//! |------------|------------|
//! | busy / locked, pool timeout, pool closed, I/O | `Unavailable` |
//! | unique violation on `metas` insert | `Conflict` |
//! | `metas` update at a stale version | `Conflict` |
//! | anything else | `Backend` |

use crate::config::StoreConfig;
use crate::error::{ReplicationError, Result, StoreError};
use crate::meta::{decode_json, DocumentBody, MetaDocument, SyncCheckpoint};
use crate::revision::LeafKey;
use crate::store::{BoxFuture, DocumentStore, StoreResult};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// SQLite's default bound-parameter limit is 999; stay well under it.
const LOOKUP_CHUNK_SIZE: usize = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_sqlite_busy_error(&e) {
            return StoreError::Unavailable(e.to_string());
        }
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_sqlite_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn decode<T: DeserializeOwned>(table: &str, raw: &str) -> StoreResult<T> {
    decode_json(raw.as_bytes())
        .map_err(|e| StoreError::Backend(format!("corrupt record in {}: {}", table, e)))
}

fn encode<T: serde::Serialize>(record: &T) -> StoreResult<String> {
    serde_json::to_string(record).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Persistent document store backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStore {
    /// Open (or create) the store described by `config`.
    ///
    /// `":memory:"` opens a private in-memory database on a single connection.
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let path_str = config.sqlite_path.clone();
        info!(path = %path_str, wal_mode = config.wal_mode, "Initializing document store");

        let in_memory = path_str == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path_str)
        };

        let journal_mode = if config.wal_mode && !in_memory {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(journal_mode)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        // Every in-memory connection is its own database.
        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;

        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                source_id TEXT PRIMARY KEY,
                doc TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS metas (
                doc_id TEXT PRIMARY KEY,
                doc TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bodies (
                id_rev TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        ] {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(StoreError::from)?;
        }

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of metadata records.
    pub async fn meta_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metas")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(count)
    }

    /// Number of stored bodies.
    pub async fn body_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bodies")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(count)
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint_wal(&self) -> Result<()> {
        let pool = &self.pool;

        execute_with_retry("wal_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await
        .map_err(StoreError::from)?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    async fn upsert_checkpoint(&self, operation: &str, checkpoint: &SyncCheckpoint) -> StoreResult<()> {
        let doc = encode(checkpoint)?;
        let now = chrono::Utc::now().timestamp_millis();
        let pool = &self.pool;

        execute_with_retry(operation, || async {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (source_id, doc, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(source_id) DO UPDATE SET
                    doc = excluded.doc,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&checkpoint.source_id)
            .bind(&doc)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }
}

impl DocumentStore for SqliteStore {
    fn read_checkpoint(&self, source_id: &str) -> BoxFuture<'_, Option<SyncCheckpoint>> {
        let source_id = source_id.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            let raw: Option<String> = execute_with_retry("read_checkpoint", || async {
                sqlx::query_scalar("SELECT doc FROM checkpoints WHERE source_id = ?")
                    .bind(&source_id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;
            raw.map(|raw| decode("checkpoints", &raw)).transpose()
        })
    }

    fn create_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.upsert_checkpoint("create_checkpoint", &checkpoint).await })
    }

    fn update_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.upsert_checkpoint("update_checkpoint", &checkpoint).await })
    }

    fn read_meta(&self, doc_id: &str) -> BoxFuture<'_, Option<MetaDocument>> {
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            let pool = &self.pool;
            let row: Option<(String, i64)> = execute_with_retry("read_meta", || async {
                sqlx::query_as("SELECT doc, version FROM metas WHERE doc_id = ?")
                    .bind(&doc_id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;
            let Some((raw, version)) = row else {
                return Ok(None);
            };
            let mut meta: MetaDocument = decode("metas", &raw)?;
            meta.version = u64::try_from(version)
                .map_err(|_| StoreError::Backend(format!("negative version for meta '{}'", doc_id)))?;
            Ok(Some(meta))
        })
    }

    fn create_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let doc = encode(&meta)?;
            let now = chrono::Utc::now().timestamp_millis();
            let pool = &self.pool;

            let result = execute_with_retry("create_meta", || async {
                sqlx::query("INSERT INTO metas (doc_id, doc, version, updated_at) VALUES (?, ?, 1, ?)")
                    .bind(&meta.id)
                    .bind(&doc)
                    .bind(now)
                    .execute(pool)
                    .await
            })
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(StoreError::Conflict { id: meta.id })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let doc = encode(&meta)?;
            let now = chrono::Utc::now().timestamp_millis();
            let expected = i64::try_from(meta.version)
                .map_err(|_| StoreError::Backend(format!("version overflow for meta '{}'", meta.id)))?;
            let pool = &self.pool;

            let result = execute_with_retry("update_meta", || async {
                sqlx::query(
                    r#"
                    UPDATE metas SET doc = ?, version = version + 1, updated_at = ?
                    WHERE doc_id = ? AND version = ?
                    "#,
                )
                .bind(&doc)
                .bind(now)
                .bind(&meta.id)
                .bind(expected)
                .execute(pool)
                .await
            })
            .await?;

            if result.rows_affected() > 0 {
                return Ok(());
            }

            let exists: Option<i64> = execute_with_retry("update_meta", || async {
                sqlx::query_scalar("SELECT version FROM metas WHERE doc_id = ?")
                    .bind(&meta.id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;
            match exists {
                Some(_) => Err(StoreError::Conflict { id: meta.id }),
                None => Err(StoreError::Backend(format!("no meta document '{}'", meta.id))),
            }
        })
    }

    fn create_bodies(&self, bodies: Vec<DocumentBody>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let rows = bodies
                .iter()
                .map(|body| Ok((body.key.to_string(), body.key.doc_id.clone(), encode(body)?)))
                .collect::<StoreResult<Vec<(String, String, String)>>>()?;
            let now = chrono::Utc::now().timestamp_millis();
            let pool = &self.pool;

            execute_with_retry("create_bodies", || async {
                let mut tx = pool.begin().await?;
                for (id_rev, doc_id, doc) in &rows {
                    sqlx::query(
                        "INSERT OR REPLACE INTO bodies (id_rev, doc_id, doc, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(id_rev)
                    .bind(doc_id)
                    .bind(doc)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await
            })
            .await?;

            debug!(count = rows.len(), "Inserted revision bodies");
            Ok(())
        })
    }

    fn lookup_bodies(&self, keys: &[LeafKey]) -> BoxFuture<'_, Vec<LeafKey>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let pool = &self.pool;
            let mut existing: HashSet<String> = HashSet::with_capacity(keys.len());

            let wanted: Vec<String> = keys.iter().map(ToString::to_string).collect();
            for chunk in wanted.chunks(LOOKUP_CHUNK_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("SELECT id_rev FROM bodies WHERE id_rev IN ({})", placeholders);

                let found: Vec<String> = execute_with_retry("lookup_bodies", || async {
                    let mut query = sqlx::query_scalar(&sql);
                    for key in chunk {
                        query = query.bind(key);
                    }
                    query.fetch_all(pool).await
                })
                .await?;
                existing.extend(found);
            }

            Ok(keys
                .into_iter()
                .zip(wanted)
                .filter(|(_, raw)| existing.contains(raw))
                .map(|(key, _)| key)
                .collect())
        })
    }

    /// Checkpoint the WAL and close the pool.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.checkpoint_wal().await {
                warn!(error = %e, "Failed to checkpoint WAL on close");
            }
            self.pool.close().await;
            info!("Document store closed");
            Ok(())
        })
    }
}
