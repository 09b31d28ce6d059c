//! In-process fast cache for single-instance deployments and tests.
//!
//! Strings and sets live in one `HashMap` behind a `parking_lot::Mutex`.
//! Each trait call takes the lock once and releases it before returning,
//! which makes every call indivisible with respect to other callers. The
//! lock is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CounterOutcome, FastCache};
use crate::error::{CacheError, CacheResult};

#[derive(Debug)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Fast cache backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryFastCache {
    entries: Mutex<HashMap<String, Entry>>,
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::corrupt(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

/// Returns the live entry for `key`, dropping it first if it has expired.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| e.is_expired(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

impl MemoryFastCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time-to-live of a key; `None` when absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut map = self.entries.lock();
        live(&mut map, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether `key` currently exists.
    pub fn contains(&self, key: &str) -> bool {
        let mut map = self.entries.lock();
        live(&mut map, key).is_some()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.lock();
        map.retain(|_, e| !e.is_expired(now));
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FastCache for MemoryFastCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut map = self.entries.lock();
        match live(&mut map, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut map = self.entries.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        let mut map = self.entries.lock();
        let mut removed = 0;
        for key in keys {
            if live(&mut map, key).is_some() {
                map.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut map = self.entries.lock();
        Ok(match live(&mut map, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn persist(&self, key: &str) -> CacheResult<bool> {
        let mut map = self.entries.lock();
        Ok(match live(&mut map, key) {
            Some(entry) => entry.expires_at.take().is_some(),
            None => false,
        })
    }

    async fn incr_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> CacheResult<CounterOutcome> {
        let mut map = self.entries.lock();
        let Some(entry) = live(&mut map, key) else {
            if limit == 0 {
                return Ok(CounterOutcome {
                    allowed: false,
                    count: 0,
                });
            }
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Text("1".to_string()),
                    expires_at: Some(Instant::now() + window),
                },
            );
            return Ok(CounterOutcome {
                allowed: true,
                count: 1,
            });
        };

        let Value::Text(text) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let current: u64 = text
            .parse()
            .map_err(|_| CacheError::corrupt(format!("counter '{key}' is not an integer")))?;

        if current < limit {
            let next = current + 1;
            *text = next.to_string();
            Ok(CounterOutcome {
                allowed: true,
                count: next,
            })
        } else {
            Ok(CounterOutcome {
                allowed: false,
                count: current,
            })
        }
    }

    async fn set_add_aligned(&self, key: &str, member: &str, ttl: Duration) -> CacheResult<()> {
        let mut map = self.entries.lock();
        let wanted = Instant::now() + ttl;
        match live(&mut map, key) {
            Some(entry) => {
                let Value::Set(members) = &mut entry.value else {
                    return Err(wrong_type(key));
                };
                members.insert(member.to_string());
                // A persistent set stays persistent; otherwise only extend.
                if let Some(at) = entry.expires_at
                    && at < wanted
                {
                    entry.expires_at = Some(wanted);
                }
            }
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(HashSet::from([member.to_string()])),
                        expires_at: Some(wanted),
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove_and_prune(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut map = self.entries.lock();
        let Some(entry) = live(&mut map, key) else {
            return Ok(false);
        };
        let Value::Set(members) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let removed = members.remove(member);
        if members.is_empty() {
            map.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut map = self.entries.lock();
        match live(&mut map, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_len(&self, key: &str) -> CacheResult<u64> {
        let mut map = self.entries.lock();
        match live(&mut map, key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
