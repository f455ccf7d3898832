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

//! peercache - Peer-aware read-through cache for Rust.
//!
//! A process asks a named [`Group`] for a key. The group answers from its own tiers, fetches the value from the peer
//! that owns the key, or loads it with the [`Getter`] of the group. Concurrent requests for the same key share a single
//! load.
//!
//! ```
//! use peercache::{getter_fn, ByteView, ByteViewSink, Context, Registry, Sink};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = Registry::new();
//! let group = registry.new_group("squares", 64 * 1024, getter_fn(|_, key: String| async move {
//!     let n: u64 = key.parse().map_err(peercache::Error::external)?;
//!     Ok(ByteView::from((n * n).to_string()))
//! }));
//!
//! let mut sink = ByteViewSink::default();
//! group.get(&Context::background(), "12", &mut sink).await.unwrap();
//! assert_eq!(sink.view().unwrap().to_string(), "144");
//! # });
//! ```

mod getter;
mod group;
mod http;
mod peers;
mod registry;
mod stats;

mod prelude;
pub use prelude::*;
