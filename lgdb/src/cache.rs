// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Response caching for backend queries.
//!
//! Route servers are slow to answer route queries, so every source keeps the
//! responses it fetched in a [`ResponseCache`] until their TTL lapses. The
//! cache is bounded; when it is full the least recently accessed entry is
//! evicted. Lapsed entries are invisible to readers immediately but only
//! reclaimed by [`ResponseCache::expire`], which housekeeping runs
//! periodically.
//!
//! [`FetchLocks`] complements the cache: it hands out one lock per key so
//! that concurrent misses on the same key result in a single backend fetch.

use crate::types::Expires;
use crate::DEFAULT_CACHE_SIZE;
use chrono::TimeDelta;
use lg_common::lock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CacheConfig {
    pub disabled: bool,

    /// Maximum number of entries. Zero disables the cache.
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            size: DEFAULT_CACHE_SIZE,
        }
    }
}

struct Entry<V> {
    value: V,

    /// Logical time of the last get or set of this entry.
    accessed: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,

    /// Monotonic access clock. Every get hit and every set takes the next
    /// tick, so no two entries ever share an access stamp.
    clock: u64,
}

impl<K, V> CacheState<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

pub struct ResponseCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    size: usize,
    disabled: bool,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Expires + Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
            }),
            size: config.size,
            disabled: config.disabled || config.size == 0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Get a live response. Entries whose TTL has lapsed are reported absent
    /// but left in place for [`Self::expire`] to reclaim.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.disabled {
            return None;
        }
        let mut state = lock!(self.state);
        let now = state.tick();
        let entry = state.entries.get_mut(key)?;
        if entry.value.ttl() <= TimeDelta::zero() {
            return None;
        }
        entry.accessed = now;
        Some(entry.value.clone())
    }

    /// Insert or replace a response. If the key is new and the cache is full,
    /// the least recently accessed entry is evicted first.
    pub fn set(&self, key: K, value: V) {
        if self.disabled {
            return;
        }
        let mut state = lock!(self.state);
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.size {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.accessed)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        state.entries.remove(&k);
                    }
                    None => break,
                }
            }
        }
        let accessed = state.tick();
        state.entries.insert(key, Entry { value, accessed });
    }

    /// Remove every lapsed entry. Returns the number of entries removed.
    pub fn expire(&self) -> usize {
        let mut state = lock!(self.state);
        let before = state.entries.len();
        state
            .entries
            .retain(|_, e| e.value.ttl() > TimeDelta::zero());
        before - state.entries.len()
    }

    /// Number of entries held, lapsed or not.
    pub fn len(&self) -> usize {
        lock!(self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-key fetch coordination.
///
/// ```ignore
/// if let Some(v) = cache.get(&key) { return Ok(v); }
/// let slot = locks.lock_for(&key);
/// let _guard = lock!(slot);
/// if let Some(v) = cache.get(&key) { return Ok(v); }
/// let v = fetch()?;
/// cache.set(key, v.clone());
/// ```
pub struct FetchLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for FetchLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> FetchLocks<K> {
    /// The lock slot for `key`, created on first use.
    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        lock!(self.locks)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop slots that no caller currently holds. Returns how many were
    /// dropped.
    pub fn prune(&self) -> usize {
        let mut locks = lock!(self.locks);
        let before = locks.len();
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        lock!(self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
