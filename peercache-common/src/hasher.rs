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

use std::fmt::Debug;

use twox_hash::XxHash64;

/// Hash function that places keys and virtual nodes on the ring.
///
/// Every process of a cluster must use the same function, otherwise they disagree on key ownership.
pub trait RingHasher: Send + Sync + 'static + Debug {
    /// Hash the given bytes.
    fn hash(&self, data: &[u8]) -> u64;
}

/// xxHash64 with a zero seed. Stable across processes and platforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct XxHash64Hasher;

impl RingHasher for XxHash64Hasher {
    fn hash(&self, data: &[u8]) -> u64 {
        XxHash64::oneshot(0, data)
    }
}
