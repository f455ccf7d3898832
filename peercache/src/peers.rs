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

use std::{fmt::Debug, sync::Arc};

use futures_core::future::BoxFuture;
use peercache_common::{
    context::Context,
    error::{Error, ErrorKind, Result},
};
use serde::{Deserialize, Serialize};

/// Asks the owner peer of a key for its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Group name.
    pub group: String,
    /// Key.
    pub key: String,
}

/// The answer of a peer to a [`GetRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    /// Value bytes.
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    /// Queries per second of the key on the answering peer, averaged over the last minute.
    pub minute_qps: Option<f64>,
}

impl GetResponse {
    /// Encode the response into its wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a response from its wire format.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        bincode::deserialize(buf).map_err(|e| Error::new(ErrorKind::Parse, "malformed get response").with_source(e))
    }
}

/// Fetches values from one peer.
pub trait PeerGetter: Send + Sync + Debug + 'static {
    /// Send `req` to the peer.
    ///
    /// Implementations should give up when `ctx` is cancelled.
    fn get(&self, ctx: &Context, req: GetRequest) -> BoxFuture<'static, Result<GetResponse>>;
}

/// Locates the peer that owns a key.
pub trait PeerPicker: Send + Sync + Debug + 'static {
    /// Pick the owner peer of `key`.
    ///
    /// Returns `None` if there is no peer or the owner is the local process.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// A [`PeerPicker`] that never finds a peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _: &str) -> Option<Arc<dyn PeerGetter>> {
        None
    }
}
