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

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_stats {
    ($( $(#[$attr:meta])* $name:ident, )*) => {
        #[derive(Debug, Default)]
        pub(crate) struct Stats {
            $( pub(crate) $name: Counter, )*
        }

        impl Stats {
            pub(crate) fn snapshot(&self) -> GroupStats {
                GroupStats {
                    $( $name: self.$name.get(), )*
                }
            }
        }

        /// A point-in-time snapshot of the statistics of a group.
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct GroupStats {
            $( $(#[$attr])* pub $name: u64, )*
        }
    };
}

define_stats! {
    /// Any `get` request, including the ones from peers.
    gets,
    /// Requests served by either tier.
    cache_hits,
    /// Values fetched from a remote peer.
    peer_loads,
    /// Failed remote fetches.
    peer_errors,
    /// `get` requests that missed both tiers.
    loads,
    /// Loads that actually ran after deduplication.
    loads_deduped,
    /// Successful local getter calls.
    local_loads,
    /// Failed local getter calls.
    local_load_errs,
    /// Requests that came from remote peers.
    server_requests,
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
