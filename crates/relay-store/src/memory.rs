//! Process-local store backed by a sharded map.
//!
//! Expiry uses `tokio::time::Instant`, so tests drive TTLs with
//! `tokio::time::pause` and `advance`. Suitable for a single instance and
//! for tests; multi-instance deployments need a shared backend.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::{Counter, Result, StateStore};

#[derive(Debug)]
enum Slot {
    Scalar { value: Value, expires_at: Instant },
    List(VecDeque<(Value, Instant)>),
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            Slot::Scalar { expires_at, .. } => *expires_at > now,
            Slot::List(items) => items.iter().any(|(_, exp)| *exp > now),
        }
    }
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key and list item. Returns how many keys were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, slot| {
            if let Slot::List(items) = slot {
                items.retain(|(_, exp)| *exp > now);
            }
            slot.is_live(now)
        });
        before - self.map.len()
    }

    /// Number of keys currently held, live or not yet purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn counter_value(key: &str, value: &Value) -> Result<i64> {
        value.as_i64().ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_owned(),
            expected: "integer",
        })
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        Ok(self.map.get(key).and_then(|slot| match &*slot {
            Slot::Scalar { value, expires_at } if *expires_at > now => Some(value.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let slot = Slot::Scalar {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        };
        let _ = self.map.insert(key.to_owned(), slot);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
    ) -> Result<Option<Value>> {
        let now = Instant::now();
        let fresh = Slot::Scalar {
            value: value.clone(),
            expires_at: now + ttl,
        };
        match self.map.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::Scalar { value: existing, expires_at } if *expires_at > now => {
                    Ok(Some(existing.clone()))
                }
                _ => {
                    let _ = occupied.insert(fresh);
                    Ok(None)
                }
            },
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(fresh);
                Ok(None)
            }
        }
    }

    async fn update_keep_ttl(&self, key: &str, value: &Value) -> Result<bool> {
        let now = Instant::now();
        let Some(mut slot) = self.map.get_mut(key) else {
            return Ok(false);
        };
        match &mut *slot {
            Slot::Scalar { value: current, expires_at } if *expires_at > now => {
                *current = value.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<Counter> {
        let now = Instant::now();
        let mut slot = self.map.entry(key.to_owned()).or_insert_with(|| Slot::Scalar {
            value: Value::from(0),
            expires_at: now,
        });
        match &mut *slot {
            Slot::Scalar { value, expires_at } if *expires_at > now => {
                let next = Self::counter_value(key, value)?.saturating_add(delta);
                *value = Value::from(next);
                Ok(Counter {
                    value: next,
                    ttl_remaining: *expires_at - now,
                })
            }
            other => {
                *other = Slot::Scalar {
                    value: Value::from(delta),
                    expires_at: now + ttl,
                };
                Ok(Counter { value: delta, ttl_remaining: ttl })
            }
        }
    }

    async fn max_with_ttl(&self, key: &str, candidate: i64, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut slot = self.map.entry(key.to_owned()).or_insert_with(|| Slot::Scalar {
            value: Value::from(0),
            expires_at: now,
        });
        match &mut *slot {
            Slot::Scalar { value, expires_at } if *expires_at > now => {
                let best = Self::counter_value(key, value)?.max(candidate);
                *value = Value::from(best);
                Ok(best)
            }
            other => {
                *other = Slot::Scalar {
                    value: Value::from(candidate),
                    expires_at: now + ttl,
                };
                Ok(candidate)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self.map.get(key).and_then(|slot| match &*slot {
            Slot::Scalar { expires_at, .. } if *expires_at > now => Some(*expires_at - now),
            Slot::List(items) => items
                .iter()
                .map(|(_, exp)| *exp)
                .filter(|exp| *exp > now)
                .max()
                .map(|exp| exp - now),
            Slot::Scalar { .. } => None,
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let Some(mut slot) = self.map.get_mut(key) else {
            return Ok(false);
        };
        match &mut *slot {
            Slot::Scalar { expires_at, .. } if *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .map
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn list_push(&self, key: &str, value: &Value, ttl: Duration) -> Result<usize> {
        let now = Instant::now();
        let mut slot = self
            .map
            .entry(key.to_owned())
            .or_insert_with(|| Slot::List(VecDeque::new()));
        match &mut *slot {
            Slot::List(items) => {
                items.retain(|(_, exp)| *exp > now);
                items.push_back((value.clone(), now + ttl));
                Ok(items.len())
            }
            Slot::Scalar { expires_at, .. } if *expires_at > now => Err(StoreError::TypeMismatch {
                key: key.to_owned(),
                expected: "list",
            }),
            other => {
                *other = Slot::List(VecDeque::from([(value.clone(), now + ttl)]));
                Ok(1)
            }
        }
    }

    async fn list_drain(&self, key: &str) -> Result<Vec<Value>> {
        let now = Instant::now();
        let Some(mut slot) = self.map.get_mut(key) else {
            return Ok(Vec::new());
        };
        let Slot::List(items) = &mut *slot else {
            return Ok(Vec::new());
        };
        Ok(items
            .drain(..)
            .filter(|(_, exp)| *exp > now)
            .map(|(v, _)| v)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
