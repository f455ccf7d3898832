// Copyright 2025 foyer Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
};

use lru::LruCache;
use parking_lot::Mutex;
use peercache_common::strict_assert;

use crate::view::ByteView;

/// A point-in-time snapshot of the statistics of a [`Tier`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    /// Usage in bytes, counting both keys and values.
    pub bytes: usize,
    /// Resident entry count.
    pub items: usize,
    /// Lookups.
    pub gets: u64,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Entries removed by [`Tier::remove_oldest`].
    pub evictions: u64,
}

struct TierShard {
    entries: LruCache<String, ByteView>,
    usage: usize,
}

/// A concurrency-safe map from key to [`ByteView`] with LRU ordering and byte usage accounting.
///
/// The tier never evicts on its own. The owner drives eviction with [`Tier::remove_oldest`] so that the budget can
/// be shared between several tiers.
pub struct Tier {
    enabled: bool,
    shard: Mutex<TierShard>,

    gets: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::new()
    }
}

impl Tier {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create a tier that never holds any entry.
    ///
    /// Lookups always miss without touching the statistics and insertions are ignored.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            shard: Mutex::new(TierShard {
                entries: LruCache::unbounded(),
                usage: 0,
            }),
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the tier accepts entries.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        if !self.enabled {
            return None;
        }
        self.gets.fetch_add(1, Ordering::Relaxed);
        let value = self.shard.lock().entries.get(key).cloned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Insert or overwrite `key`.
    pub fn add(&self, key: impl Into<String>, value: ByteView) {
        if !self.enabled {
            return;
        }
        let key = key.into();
        let key_len = key.len();
        let weight = key_len + value.len();

        let mut shard = self.shard.lock();
        if let Some(old) = shard.entries.put(key, value) {
            strict_assert!(shard.usage >= key_len + old.len());
            shard.usage -= key_len + old.len();
        }
        shard.usage += weight;
    }

    /// Remove `key` if it is resident.
    pub fn remove(&self, key: &str) -> Option<ByteView> {
        let mut shard = self.shard.lock();
        let value = shard.entries.pop(key)?;
        shard.usage -= key.len() + value.len();
        Some(value)
    }

    /// Evict the least recently used entry.
    ///
    /// Returns `None` if the tier is empty.
    pub fn remove_oldest(&self) -> Option<(String, ByteView)> {
        let mut shard = self.shard.lock();
        let (key, value) = shard.entries.pop_lru()?;
        shard.usage -= key.len() + value.len();
        drop(shard);

        self.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%key, bytes = value.len(), "[tier]: evict");
        Some((key, value))
    }

    /// Usage in bytes, counting both keys and values.
    pub fn bytes(&self) -> usize {
        self.shard.lock().usage
    }

    /// Resident entry count.
    pub fn items(&self) -> usize {
        self.shard.lock().entries.len()
    }

    /// Take a snapshot of the statistics.
    pub fn stats(&self) -> TierStats {
        let (bytes, items) = {
            let shard = self.shard.lock();
            (shard.usage, shard.entries.len())
        };
        TierStats {
            bytes,
            items,
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_usage_accounting() {
        let tier = Tier::new();
        tier.add("k1", ByteView::from("v1"));
        tier.add("key2", ByteView::from("value2"));
        assert_eq!(tier.bytes(), 4 + 10);
        assert_eq!(tier.items(), 2);

        // Overwrite replaces the old weight.
        tier.add("k1", ByteView::from("longer"));
        assert_eq!(tier.bytes(), 8 + 10);
        assert_eq!(tier.items(), 2);

        assert_eq!(tier.remove("key2"), Some(ByteView::from("value2")));
        assert_eq!(tier.bytes(), 8);
        assert_eq!(tier.remove("key2"), None);
    }

    #[test]
    fn test_lru_order() {
        let tier = Tier::new();
        for key in ["a", "b", "c"] {
            tier.add(key, ByteView::from("v"));
        }

        // Touch "a" so that "b" becomes the oldest one.
        assert!(tier.get("a").is_some());

        assert_eq!(tier.remove_oldest().unwrap().0, "b");
        assert_eq!(tier.remove_oldest().unwrap().0, "c");
        assert_eq!(tier.remove_oldest().unwrap().0, "a");
        assert!(tier.remove_oldest().is_none());
        assert_eq!(tier.bytes(), 0);

        let stats = tier.stats();
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_disabled() {
        let tier = Tier::disabled();
        tier.add("k", ByteView::from("v"));
        assert!(tier.get("k").is_none());
        assert_eq!(tier.stats(), TierStats::default());
    }

    #[test]
    fn test_concurrent_access() {
        let tier = Arc::new(Tier::new());
        let handles = (0..8)
            .map(|t| {
                let tier = tier.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("{t}-{i}");
                        tier.add(key.clone(), ByteView::from(vec![0u8; 8]));
                        assert!(tier.get(&key).is_some());
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tier.items(), 8000);
        let expected = (0..8)
            .flat_map(|t| (0..1000).map(move |i| format!("{t}-{i}").len() + 8))
            .sum::<usize>();
        assert_eq!(tier.bytes(), expected);
    }
}
