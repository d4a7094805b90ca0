//! SQLite-backed store shared by every relay process on a host.
//!
//! Expiry is stored as wall-clock milliseconds. Multi-statement operations
//! run inside `BEGIN IMMEDIATE` transactions so concurrent processes see
//! single-key atomicity.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;
use crate::store::{Counter, Result, StateStore};

/// SQLite [`StateStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Private in-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        if version.is_none() {
            let _ = conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema::SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every expired row. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.run(|conn, now| {
            let kv = conn.execute("DELETE FROM kv WHERE expires_at_ms <= ?1", [now])?;
            let list = conn.execute("DELETE FROM kv_list WHERE expires_at_ms <= ?1", [now])?;
            debug!(kv, list, "purged expired rows");
            Ok(kv + list)
        })
        .await
    }

    /// Run `f` on a blocking thread with the connection and the current time in ms.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, i64) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard, now_ms())
        })
        .await?
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn remaining(expires_at_ms: i64, now: i64) -> Duration {
    Duration::from_millis(u64::try_from(expires_at_ms - now).unwrap_or(0))
}

fn decode(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

fn live_scalar(conn: &Connection, key: &str, now: i64) -> Result<Option<(String, i64)>> {
    Ok(conn
        .query_row(
            "SELECT value, expires_at_ms FROM kv WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn upsert(conn: &Connection, key: &str, raw: &str, expires_at_ms: i64) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_ms = excluded.expires_at_ms",
        params![key, raw, expires_at_ms],
    )?;
    Ok(())
}

fn as_counter(key: &str, raw: &str) -> Result<i64> {
    decode(raw)?.as_i64().ok_or_else(|| StoreError::TypeMismatch {
        key: key.to_owned(),
        expected: "integer",
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            live_scalar(conn, &key, now)?
                .map(|(raw, _)| decode(&raw))
                .transpose()
        })
        .await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let key = key.to_owned();
        let raw = serde_json::to_string(value)?;
        self.run(move |conn, now| upsert(conn, &key, &raw, now.saturating_add(ttl_ms(ttl))))
            .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> Result<Option<Value>> {
        let key = key.to_owned();
        let raw = serde_json::to_string(value)?;
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some((existing, _)) = live_scalar(&tx, &key, now)? {
                return Ok(Some(decode(&existing)?));
            }
            upsert(&tx, &key, &raw, now.saturating_add(ttl_ms(ttl)))?;
            tx.commit()?;
            Ok(None)
        })
        .await
    }

    async fn update_keep_ttl(&self, key: &str, value: &Value) -> Result<bool> {
        let key = key.to_owned();
        let raw = serde_json::to_string(value)?;
        self.run(move |conn, now| {
            let changed = conn.execute(
                "UPDATE kv SET value = ?2 WHERE key = ?1 AND expires_at_ms > ?3",
                params![key, raw, now],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<Counter> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let counter = match live_scalar(&tx, &key, now)? {
                Some((raw, expires_at)) => {
                    let next = as_counter(&key, &raw)?.saturating_add(delta);
                    let _ = tx.execute(
                        "UPDATE kv SET value = ?2 WHERE key = ?1",
                        params![key, next.to_string()],
                    )?;
                    Counter { value: next, ttl_remaining: remaining(expires_at, now) }
                }
                None => {
                    upsert(&tx, &key, &delta.to_string(), now.saturating_add(ttl_ms(ttl)))?;
                    Counter { value: delta, ttl_remaining: ttl }
                }
            };
            tx.commit()?;
            Ok(counter)
        })
        .await
    }

    async fn max_with_ttl(&self, key: &str, candidate: i64, ttl: Duration) -> Result<i64> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let best = match live_scalar(&tx, &key, now)? {
                Some((raw, _)) => {
                    let best = as_counter(&key, &raw)?.max(candidate);
                    let _ = tx.execute(
                        "UPDATE kv SET value = ?2 WHERE key = ?1",
                        params![key, best.to_string()],
                    )?;
                    best
                }
                None => {
                    upsert(&tx, &key, &candidate.to_string(), now.saturating_add(ttl_ms(ttl)))?;
                    candidate
                }
            };
            tx.commit()?;
            Ok(best)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            if let Some((_, expires_at)) = live_scalar(conn, &key, now)? {
                return Ok(Some(remaining(expires_at, now)));
            }
            let list_max: Option<i64> = conn.query_row(
                "SELECT MAX(expires_at_ms) FROM kv_list WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now],
                |row| row.get(0),
            )?;
            Ok(list_max.map(|exp| remaining(exp, now)))
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            let changed = conn.execute(
                "UPDATE kv SET expires_at_ms = ?2 WHERE key = ?1 AND expires_at_ms > ?3",
                params![key, now.saturating_add(ttl_ms(ttl)), now],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let live = tx.execute(
                "DELETE FROM kv WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now],
            )? + tx.execute(
                "DELETE FROM kv_list WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now],
            )?;
            let _ = tx.execute("DELETE FROM kv WHERE key = ?1", [&key])?;
            let _ = tx.execute("DELETE FROM kv_list WHERE key = ?1", [&key])?;
            tx.commit()?;
            Ok(live > 0)
        })
        .await
    }

    async fn list_push(&self, key: &str, value: &Value, ttl: Duration) -> Result<usize> {
        let key = key.to_owned();
        let raw = serde_json::to_string(value)?;
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if live_scalar(&tx, &key, now)?.is_some() {
                return Err(StoreError::TypeMismatch { key, expected: "list" });
            }
            let _ = tx.execute(
                "DELETE FROM kv_list WHERE key = ?1 AND expires_at_ms <= ?2",
                params![key, now],
            )?;
            let _ = tx.execute(
                "INSERT INTO kv_list (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
                params![key, raw, now.saturating_add(ttl_ms(ttl))],
            )?;
            let len: i64 = tx.query_row(
                "SELECT COUNT(*) FROM kv_list WHERE key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(usize::try_from(len).unwrap_or(0))
        })
        .await
    }

    async fn list_drain(&self, key: &str) -> Result<Vec<Value>> {
        let key = key.to_owned();
        self.run(move |conn, now| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let raws: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT value FROM kv_list WHERE key = ?1 AND expires_at_ms > ?2 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![key, now], |row| row.get(0))?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            let _ = tx.execute("DELETE FROM kv_list WHERE key = ?1", [&key])?;
            tx.commit()?;
            raws.iter().map(|raw| decode(raw)).collect()
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.run(|conn, _| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }
}
