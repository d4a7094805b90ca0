//! The `StateStore` contract every backend implements.
//!
//! All mutations are single-key atomic operations. Every key carries an
//! explicit expiry; expired keys behave as absent even before a backend
//! reaps them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn StateStore>;

/// Counter value after an atomic increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub value: i64,
    /// Time left before the counter key expires.
    pub ttl_remaining: Duration,
}

/// Key/value store with per-key expiry.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Read a live value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one and resetting its expiry.
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    /// Write only if no live value exists. Returns the existing value when
    /// the write was skipped.
    async fn set_if_absent(&self, key: &str, value: &Value, ttl: Duration)
    -> Result<Option<Value>>;

    /// Replace a live value without touching its expiry. Returns `false`
    /// if the key is absent.
    async fn update_keep_ttl(&self, key: &str, value: &Value) -> Result<bool>;

    /// Add `delta` to an integer counter. The first increment creates the
    /// key with `ttl`; later increments leave the expiry alone.
    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<Counter>;

    /// Raise a counter to `value` if it is larger. Same expiry rule as
    /// [`StateStore::incr_with_ttl`]. Returns the stored maximum.
    async fn max_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<i64>;

    /// Remaining lifetime of a live key.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Reset the expiry of a live scalar to `ttl` from now. Returns `false`
    /// if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key (scalar or list). Returns whether anything live was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append to a FIFO list. Each item expires on its own after `ttl`.
    /// Returns the number of live items after the push.
    async fn list_push(&self, key: &str, value: &Value, ttl: Duration) -> Result<usize>;

    /// Atomically remove and return every live item, oldest first.
    async fn list_drain(&self, key: &str) -> Result<Vec<Value>>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;
}

/// Typed helpers over any [`StateStore`].
#[async_trait]
pub trait StoreExt: StateStore {
    /// Read and decode a live value.
    async fn get_as<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value.
    async fn set_as<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let v = serde_json::to_value(value)?;
        self.set(key, &v, ttl).await
    }
}

impl<S: StateStore + ?Sized> StoreExt for S {}
