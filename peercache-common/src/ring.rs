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

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use crate::hasher::{RingHasher, XxHash64Hasher};

/// A consistent hashing ring that maps keys to peers.
///
/// Each peer is placed on the ring `replicas` times. The `i`-th virtual node of peer `p` is placed at
/// `hash("{i}{p}")`. A key belongs to the peer owning the first virtual node at or after the hash of the key,
/// wrapping around to the smallest one.
///
/// The ring is never edited in place when the membership changes: callers [`Ring::rebuild`] it from the full peer
/// list, which only moves about `1 / peers` of the keyspace when a single peer joins or leaves.
pub struct Ring {
    hasher: Arc<dyn RingHasher>,
    replicas: usize,
    /// Sorted, deduplicated virtual node hashes.
    points: Vec<u64>,
    owners: HashMap<u64, String>,
}

impl Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("hasher", &self.hasher)
            .field("replicas", &self.replicas)
            .field("points", &self.points.len())
            .finish()
    }
}

impl Ring {
    /// Create an empty ring with xxHash64 as the hash function.
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Arc::new(XxHash64Hasher))
    }

    /// Create an empty ring with the given hash function.
    pub fn with_hasher(replicas: usize, hasher: Arc<dyn RingHasher>) -> Self {
        Self {
            hasher,
            replicas,
            points: vec![],
            owners: HashMap::new(),
        }
    }

    /// Virtual node count per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Returns `true` if no peer is on the ring.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Count of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Add peers to the ring.
    ///
    /// If two virtual nodes collide, the one added later owns the point.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let hash = self.hasher.hash(format!("{i}{peer}").as_bytes());
                self.points.push(hash);
                self.owners.insert(hash, peer.to_string());
            }
        }
        self.points.sort_unstable();
        self.points.dedup();
        crate::strict_assert_eq!(self.points.len(), self.owners.len());
    }

    /// Drop all peers and rebuild the ring from the given peer list.
    pub fn rebuild<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.points.clear();
        self.owners.clear();
        self.add(peers);
    }

    /// Get the peer that owns `key`.
    ///
    /// Returns `None` if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = self.hasher.hash(key.as_bytes());
        let mut index = self.points.partition_point(|point| *point < hash);
        if index == self.points.len() {
            index = 0;
        }
        self.owners.get(&self.points[index]).map(|peer| peer.as_str())
    }
}
