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

use std::{collections::HashMap, convert::Infallible, fmt::Debug, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_core::future::BoxFuture;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{
    body::Incoming,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::Service,
    Request, Response, StatusCode, Uri,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use parking_lot::Mutex;
use peercache_common::{
    context::Context,
    error::{Error, ErrorKind, Result},
    hasher::{RingHasher, XxHash64Hasher},
    ring::Ring,
};
use peercache_memory::AllocatingByteSliceSink;
use tokio::net::TcpListener;

use crate::{
    peers::{GetRequest, GetResponse, PeerGetter, PeerPicker},
    registry::{Registry, WeakRegistry},
};

/// Default URL path prefix of peer requests.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";
/// Default count of virtual nodes per peer.
pub const DEFAULT_REPLICAS: usize = 50;

type HttpClient = Client<HttpConnector, Empty<Bytes>>;

/// Options of [`HttpPool`].
#[derive(Debug, Clone)]
pub struct HttpPoolOptions {
    base_path: String,
    replicas: usize,
    hasher: Arc<dyn RingHasher>,
    timeout: Option<Duration>,
}

impl Default for HttpPoolOptions {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            replicas: DEFAULT_REPLICAS,
            hasher: Arc::new(XxHash64Hasher),
            timeout: None,
        }
    }
}

impl HttpPoolOptions {
    /// Set the URL path prefix of peer requests. A trailing `/` is appended if missing.
    ///
    /// Default: `/_peercache/`.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let mut base_path = base_path.into();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }
        self.base_path = base_path;
        self
    }

    /// Set the count of virtual nodes per peer on the ring.
    ///
    /// Default: `50`.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the hash function of the ring. All peers must use the same one.
    ///
    /// Default: xxHash64.
    pub fn with_hasher(mut self, hasher: Arc<dyn RingHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Bound every request to a peer with a timeout, on top of the deadline of the caller.
    ///
    /// Default: no timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct PoolState {
    ring: Ring,
    getters: HashMap<String, Arc<HttpGetter>>,
}

struct HttpPoolInner {
    self_url: String,
    options: HttpPoolOptions,
    registry: WeakRegistry,
    client: HttpClient,
    state: Mutex<PoolState>,
}

/// Peer binding over HTTP.
///
/// The pool is both the [`PeerPicker`] of the local groups and the server that answers requests from other peers.
/// Peers are identified by their base URL, e.g. `http://10.0.0.1:8080`.
#[derive(Clone)]
pub struct HttpPool {
    inner: Arc<HttpPoolInner>,
}

impl Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_url", &self.inner.self_url)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl HttpPool {
    /// Create a pool with the default options and register it as the peer picker of `registry`.
    ///
    /// # Panics
    ///
    /// Panics if `registry` already has a peer picker.
    pub fn new(registry: &Registry, self_url: impl Into<String>) -> Self {
        Self::with_options(registry, self_url, HttpPoolOptions::default())
    }

    /// Create a pool and register it as the peer picker of `registry`.
    ///
    /// # Panics
    ///
    /// Panics if `registry` already has a peer picker.
    pub fn with_options(registry: &Registry, self_url: impl Into<String>, options: HttpPoolOptions) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let ring = Ring::with_hasher(options.replicas, options.hasher.clone());
        let pool = Self {
            inner: Arc::new(HttpPoolInner {
                self_url: self_url.into(),
                options,
                registry: registry.downgrade(),
                client,
                state: Mutex::new(PoolState {
                    ring,
                    getters: HashMap::new(),
                }),
            }),
        };

        let picker = pool.clone();
        registry.register_peer_picker(move || Arc::new(picker.clone()));

        pool
    }

    /// URL of this process.
    pub fn self_url(&self) -> &str {
        &self.inner.self_url
    }

    /// Replace the peer set. The list should include this process.
    pub fn set<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers = peers.into_iter().map(|p| p.as_ref().to_string()).collect::<Vec<_>>();

        let mut ring = Ring::with_hasher(self.inner.options.replicas, self.inner.options.hasher.clone());
        ring.add(&peers);
        let getters = peers
            .iter()
            .map(|peer| {
                let getter = HttpGetter {
                    base_url: format!("{peer}{}", self.inner.options.base_path),
                    client: self.inner.client.clone(),
                    timeout: self.inner.options.timeout,
                };
                (peer.clone(), Arc::new(getter))
            })
            .collect();

        *self.inner.state.lock() = PoolState { ring, getters };
        tracing::info!(?peers, "[http pool]: peers updated");
    }

    /// Accept and serve peer requests from `listener` until `ctx` is cancelled.
    pub async fn serve(&self, listener: TcpListener, ctx: Context) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, base_path = %self.inner.options.base_path, "[http pool]: serving peer requests");

        loop {
            let Some((stream, remote)) = accept(&ctx, || listener.accept()).await else {
                tracing::info!(%addr, "[http pool]: stop serving");
                return Ok(());
            };

            let io = TokioIo::new(stream);
            let service = PeerService { pool: self.clone() };

            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::warn!(%remote, "[http pool]: serve connection error: {e}");
                }
            });
        }
    }

    /// Answer one peer request.
    ///
    /// `GET {base_path}{group}/{key}`, with both group and key percent-encoded. Responds `200` with the encoded
    /// [`GetResponse`], `400` if the path is malformed, `404` if the group does not exist and `500` if the load fails.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let (group, key) = match self.parse_path(req.uri().path()) {
            Ok(res) => res,
            Err(e) if e.kind() == ErrorKind::NotFound => return text(StatusCode::NOT_FOUND, e.message()),
            Err(e) => return text(StatusCode::BAD_REQUEST, e.message()),
        };

        let Some(group) = self.inner.registry.upgrade().and_then(|r| r.get_group(&group)) else {
            return text(StatusCode::NOT_FOUND, &format!("no such group: {group}"));
        };
        group.record_server_request();

        let mut value = vec![];
        if let Err(e) = group
            .get(&Context::background(), &key, &mut AllocatingByteSliceSink::new(&mut value))
            .await
        {
            tracing::debug!(group = group.name(), %key, "[http pool]: load failed: {e}");
            return text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }

        let body = match (GetResponse {
            value,
            minute_qps: None,
        })
        .encode()
        {
            Ok(body) => body,
            Err(e) => return text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        };

        let mut resp = Response::new(Full::new(Bytes::from(body)));
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        resp
    }

    fn parse_path(&self, path: &str) -> Result<(String, String)> {
        let Some(rest) = path.strip_prefix(&self.inner.options.base_path) else {
            return Err(Error::new(ErrorKind::NotFound, format!("unexpected path: {path}")));
        };
        let Some((group, key)) = rest.split_once('/') else {
            return Err(Error::new(ErrorKind::InvalidArgument, "bad request").with_context("path", path));
        };
        let decode = |s: &str| {
            urlencoding::decode(s)
                .map(|s| s.into_owned())
                .map_err(|e| Error::new(ErrorKind::InvalidArgument, "bad request").with_source(e))
        };
        Ok((decode(group)?, decode(key)?))
    }
}

/// Wait between retries after a failed accept, e.g. when the process is out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept the next connection with `f`, retrying failures after [`ACCEPT_RETRY_DELAY`].
///
/// Returns `None` once `ctx` is cancelled.
async fn accept<F, FU, T>(ctx: &Context, mut f: F) -> Option<T>
where
    F: FnMut() -> FU,
    FU: std::future::Future<Output = std::io::Result<T>>,
{
    loop {
        let res = tokio::select! {
            _ = ctx.cancelled() => return None,
            res = f() => res,
        };
        match res {
            Ok(conn) => return Some(conn),
            Err(e) => {
                tracing::error!("[http pool]: accept connection error, retry in {ACCEPT_RETRY_DELAY:?}: {e}");
                tokio::select! {
                    _ = ctx.cancelled() => return None,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.inner.state.lock();
        let peer = state.ring.get(key)?;
        if peer == self.inner.self_url {
            return None;
        }
        state.getters.get(peer).map(|getter| getter.clone() as Arc<dyn PeerGetter>)
    }
}

fn text(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::copy_from_slice(msg.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

struct PeerService {
    pool: HttpPool,
}

impl Service<Request<Incoming>> for PeerService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let pool = self.pool.clone();
        Box::pin(async move { Ok(pool.handle(req).await) })
    }
}

/// Fetches values from one peer over HTTP.
pub struct HttpGetter {
    base_url: String,
    client: HttpClient,
    timeout: Option<Duration>,
}

impl Debug for HttpGetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGetter").field("base_url", &self.base_url).finish()
    }
}

impl PeerGetter for HttpGetter {
    fn get(&self, ctx: &Context, req: GetRequest) -> BoxFuture<'static, Result<GetResponse>> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(&req.group),
            urlencoding::encode(&req.key)
        );
        let client = self.client.clone();
        let ctx = match self.timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        };
        Box::pin(async move { ctx.run(fetch(client, url)).await? })
    }
}

async fn fetch(client: HttpClient, url: String) -> Result<GetResponse> {
    let peer_error = |msg: &'static str| Error::new(ErrorKind::Peer, msg).with_context("url", &url);

    let uri: Uri = url.parse().map_err(|e| peer_error("invalid peer url").with_source(e))?;
    let resp = client
        .get(uri)
        .await
        .map_err(|e| peer_error("request peer failed").with_source(e))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| peer_error("read peer response failed").with_source(e))?
        .to_bytes();

    if status != StatusCode::OK {
        return Err(peer_error("peer returned an error")
            .with_context("status", status)
            .with_context("body", String::from_utf8_lossy(&body)));
    }
    GetResponse::decode(&body).map_err(|e| peer_error("malformed peer response").with_source(e))
}
