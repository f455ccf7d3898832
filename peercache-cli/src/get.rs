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

use std::{io::Write, time::Duration};

use anyhow::anyhow;
use clap::Args;
use peercache::{
    Context, GetRequest, HttpPool, HttpPoolOptions, PeerGetter, PeerPicker, Registry, DEFAULT_BASE_PATH,
};

#[derive(Debug, Args)]
pub struct GetArgs {
    /// URL of the node to ask, e.g. `http://127.0.0.1:8080`.
    #[arg(long)]
    peer: String,

    /// Name of the group.
    #[arg(long, default_value = "files")]
    group: String,

    /// Key to get.
    #[arg(long)]
    key: String,

    /// URL path prefix of peer requests.
    #[arg(long, default_value = DEFAULT_BASE_PATH)]
    base_path: String,

    /// Timeout of the request in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

pub async fn run(args: GetArgs) -> anyhow::Result<()> {
    // A pool that knows nothing but the asked node always picks it.
    let registry = Registry::new();
    let options = HttpPoolOptions::default().with_base_path(args.base_path);
    let pool = HttpPool::with_options(&registry, "", options);
    pool.set([&args.peer]);
    let peer = pool
        .pick_peer(&args.key)
        .ok_or_else(|| anyhow!("no peer to ask for key {:?}", args.key))?;

    let ctx = Context::background().with_timeout(Duration::from_millis(args.timeout_ms));
    let resp = peer
        .get(
            &ctx,
            GetRequest {
                group: args.group,
                key: args.key,
            },
        )
        .await?;

    std::io::stdout().write_all(&resp.value)?;
    Ok(())
}
