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

//! Shared components for peercache.

/// Allow enable debug assertions in release profile with feature "strict_assertion".
pub mod assert;
/// Request scoped cancellation and deadline.
pub mod context;
/// The error type and result alias shared by all peercache crates.
pub mod error;
/// Hash functions used to place keys and peers on the ring.
pub mod hasher;
/// Consistent hashing ring.
pub mod ring;
