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
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use bytesize::ByteSize;
use clap::Args;
use futures_core::future::BoxFuture;
use peercache::{Context, Getter, HttpPool, HttpPoolOptions, Registry, Sink, DEFAULT_BASE_PATH, DEFAULT_REPLICAS};
use tokio::net::TcpListener;

use crate::error::{Error, Result};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on for peer requests.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// URL other peers use to reach this node. Defaults to `http://{addr}`.
    #[arg(long)]
    self_url: Option<String>,

    /// URLs of all peers, comma separated. This node is added if missing.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Name of the group.
    #[arg(long, default_value = "files")]
    group: String,

    /// Directory whose files are the values, keyed by their relative path.
    #[arg(long)]
    dir: PathBuf,

    /// Byte budget of the group.
    #[arg(long, default_value = "64MiB")]
    cache_bytes: ByteSize,

    /// URL path prefix of peer requests.
    #[arg(long, default_value = DEFAULT_BASE_PATH)]
    base_path: String,

    /// Virtual nodes per peer on the ring.
    #[arg(long, default_value_t = DEFAULT_REPLICAS)]
    replicas: usize,

    /// Timeout of requests to other peers in milliseconds.
    #[arg(long)]
    peer_timeout_ms: Option<u64>,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let listener = TcpListener::bind(args.addr).await?;
    let self_url = match args.self_url {
        Some(url) => url,
        None => format!("http://{}", listener.local_addr()?),
    };

    let mut options = HttpPoolOptions::default()
        .with_base_path(args.base_path)
        .with_replicas(args.replicas);
    if let Some(ms) = args.peer_timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let registry = Registry::new();
    let pool = HttpPool::with_options(&registry, &self_url, options);
    let mut peers = args.peers;
    if !peers.contains(&self_url) {
        peers.push(self_url.clone());
    }
    pool.set(&peers);

    let cache_bytes = usize::try_from(args.cache_bytes.as_u64())?;
    registry.new_group(&args.group, cache_bytes, FileGetter::new(args.dir));
    tracing::info!(group = %args.group, %self_url, cache_bytes = %args.cache_bytes, "[serve]: node started");

    let ctx = Context::background();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    pool.serve(listener, ctx).await?;
    Ok(())
}

/// Loads the value of a key from the file at the same relative path under a directory.
#[derive(Debug)]
struct FileGetter {
    root: PathBuf,
}

impl FileGetter {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        let data = tokio::fs::read(&path).await?;
        tracing::debug!(key, path = %path.display(), bytes = data.len(), "[serve]: load file");
        Ok(data)
    }
}

impl Getter for FileGetter {
    fn get<'a>(&'a self, _: &'a Context, key: &'a str, sink: &'a mut dyn Sink) -> BoxFuture<'a, peercache::Result<()>> {
        Box::pin(async move {
            let data = self.read(key).await.map_err(peercache::Error::external)?;
            sink.set_bytes(&data)
        })
    }
}

#[cfg(test)]
mod tests {
    use peercache::{ByteViewSink, ErrorKind};

    use super::*;

    #[test]
    fn test_resolve_rejects_escaping_keys() {
        let getter = FileGetter::new(PathBuf::from("/srv/data"));

        assert_eq!(getter.resolve("a/b.txt").unwrap(), PathBuf::from("/srv/data/a/b.txt"));
        for key in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "./a"] {
            assert!(
                matches!(getter.resolve(key), Err(Error::InvalidKey(_))),
                "key: {key}"
            );
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_file_getter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello world").unwrap();
        let getter = FileGetter::new(dir.path().to_path_buf());
        let ctx = Context::background();

        let mut sink = ByteViewSink::default();
        getter.get(&ctx, "hello.txt", &mut sink).await.unwrap();
        assert!(sink.view().unwrap().equal_str("hello world"));

        let err = getter.get(&ctx, "missing.txt", &mut sink).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(err.downcast_ref::<Error>().is_some());
    }
}
