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
    sync::{Arc, OnceLock},
};

use peercache_common::{context::Context, error::Result};
use peercache_memory::{set_sink_view, ByteView, ByteViewSink, FlightGroup, Sink, Tier, TierStats};
use rand::Rng;

use crate::{
    getter::Getter,
    peers::{GetRequest, PeerGetter, PeerPicker},
    registry::WeakRegistry,
    stats::{GroupStats, Stats},
};

/// Default probability of keeping a value fetched from a peer in the hot tier.
pub const DEFAULT_HOT_PROMOTION_RATIO: f64 = 0.1;

/// Selects one of the two tiers of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// Values this process owns, loaded by the local getter.
    Main,
    /// Values owned by other peers that are popular enough to be kept locally.
    Hot,
}

/// Builder of a [`Group`].
///
/// Obtained from [`crate::Registry::group_builder`].
pub struct GroupBuilder {
    name: String,
    registry: WeakRegistry,
    cache_bytes: usize,
    getter: Option<Arc<dyn Getter>>,
    peers: Option<Arc<dyn PeerPicker>>,
    hot_promotion_ratio: f64,
}

impl Debug for GroupBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("name", &self.name)
            .field("cache_bytes", &self.cache_bytes)
            .field("peers", &self.peers)
            .field("hot_promotion_ratio", &self.hot_promotion_ratio)
            .finish()
    }
}

impl GroupBuilder {
    pub(crate) fn new(name: impl Into<String>, registry: WeakRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
            cache_bytes: 0,
            getter: None,
            peers: None,
            hot_promotion_ratio: DEFAULT_HOT_PROMOTION_RATIO,
        }
    }

    /// Set the byte budget shared by the main and hot tiers.
    ///
    /// `0` disables caching: every request is loaded.
    ///
    /// Default: `0`.
    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Set the getter that loads keys owned by this process. Required.
    pub fn with_getter(mut self, getter: impl Getter) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Set the peer picker of the group.
    ///
    /// If not set, the peer picker is resolved from the registry on the first request.
    pub fn with_peer_picker(mut self, peers: Arc<dyn PeerPicker>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Set the probability of keeping a value fetched from a peer in the hot tier.
    ///
    /// Default: `0.1`.
    ///
    /// # Panics
    ///
    /// Panics if `ratio` is not in `[0, 1]`.
    pub fn with_hot_promotion_ratio(mut self, ratio: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&ratio),
            "hot promotion ratio must be in [0, 1], given: {ratio}"
        );
        self.hot_promotion_ratio = ratio;
        self
    }

    /// Build the group and register it.
    ///
    /// # Panics
    ///
    /// Panics if no getter is set, if the registry is already dropped, or if the registry already has a group with the
    /// same name.
    pub fn build(self) -> Group {
        let Some(getter) = self.getter else {
            panic!("group {} is built without a getter", self.name);
        };

        let (main, hot) = if self.cache_bytes == 0 {
            (Tier::disabled(), Tier::disabled())
        } else {
            (Tier::new(), Tier::new())
        };

        let peers = OnceLock::new();
        if let Some(p) = self.peers {
            let _ = peers.set(p);
        }

        let group = Group {
            inner: Arc::new(GroupInner {
                name: self.name,
                getter,
                peers,
                registry: self.registry,
                cache_bytes: self.cache_bytes,
                hot_promotion_ratio: self.hot_promotion_ratio,
                main,
                hot,
                flights: FlightGroup::new(),
                stats: Stats::default(),
            }),
        };

        let Some(registry) = group.inner.registry.upgrade() else {
            panic!("registry of group {} is dropped before the group is built", group.inner.name);
        };
        registry.register(group.clone());

        group
    }
}

struct GroupInner {
    name: String,
    getter: Arc<dyn Getter>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    registry: WeakRegistry,

    cache_bytes: usize,
    hot_promotion_ratio: f64,

    /// Values this process is authoritative for.
    main: Tier,
    /// Values of other peers that are kept to avoid network hotspots.
    hot: Tier,

    flights: FlightGroup<ByteView>,
    stats: Stats,
}

/// A named cache namespace with its own getter and byte budget.
///
/// A group serves a request from its tiers if possible. Otherwise the request is deduplicated with the concurrent ones
/// for the same key, then either fetched from the owner peer or loaded by the getter.
///
/// Cloning a [`Group`] is cheap and refers to the same group.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.inner.name)
            .field("cache_bytes", &self.inner.cache_bytes)
            .field("main", &self.inner.main)
            .field("hot", &self.inner.hot)
            .finish()
    }
}

impl Group {
    /// Name of the group.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Byte budget shared by both tiers.
    pub fn cache_bytes(&self) -> usize {
        self.inner.cache_bytes
    }

    /// Get the value of `key` into `sink`.
    ///
    /// Errors of the getter are returned as is. Errors of peers are never returned: the getter is called instead.
    /// Cancelling `ctx` or passing its deadline only stops this caller from waiting; the load goes on for the others.
    pub async fn get(&self, ctx: &Context, key: &str, sink: &mut dyn Sink) -> Result<()> {
        self.inner.peers();
        self.inner.stats.gets.inc();

        if let Some(value) = self.inner.lookup_cache(key) {
            self.inner.stats.cache_hits.inc();
            return set_sink_view(sink, value);
        }

        let value = self.load(ctx, key).await?;
        set_sink_view(sink, value)
    }

    async fn load(&self, ctx: &Context, key: &str) -> Result<ByteView> {
        self.inner.stats.loads.inc();

        // Shared by every caller of the flight: no single caller's deadline or cancellation applies.
        let inner = self.inner.clone();
        let shared = Context::background();
        let owned = key.to_string();
        self.inner
            .flights
            .execute_with(ctx, key, move || async move { inner.load_once(&shared, &owned).await })
            .await
    }

    /// Take a snapshot of the statistics of the group.
    pub fn stats(&self) -> GroupStats {
        self.inner.stats.snapshot()
    }

    /// Take a snapshot of the statistics of one tier.
    pub fn cache_stats(&self, cache: CacheType) -> TierStats {
        self.inner.tier(cache).stats()
    }

    pub(crate) fn record_server_request(&self) {
        self.inner.stats.server_requests.inc();
    }
}

impl GroupInner {
    fn peers(&self) -> &Arc<dyn PeerPicker> {
        self.peers.get_or_init(|| match self.registry.upgrade() {
            Some(registry) => registry.peer_picker(&self.name),
            None => Arc::new(crate::peers::NoPeers),
        })
    }

    fn tier(&self, cache: CacheType) -> &Tier {
        match cache {
            CacheType::Main => &self.main,
            CacheType::Hot => &self.hot,
        }
    }

    async fn load_once(&self, ctx: &Context, key: &str) -> Result<ByteView> {
        // Another flight may have filled the cache while this one was being scheduled.
        if let Some(value) = self.lookup_cache(key) {
            self.stats.cache_hits.inc();
            return Ok(value);
        }
        self.stats.loads_deduped.inc();

        if let Some(peer) = self.peers().pick_peer(key) {
            match self.get_from_peer(ctx, peer.as_ref(), key).await {
                Ok(value) => {
                    self.stats.peer_loads.inc();
                    return Ok(value);
                }
                Err(e) => {
                    self.stats.peer_errors.inc();
                    tracing::debug!(group = %self.name, key, ?peer, "[group]: fetch from peer failed, load locally: {e}");
                }
            }
        }

        let value = match self.get_locally(ctx, key).await {
            Ok(value) => value,
            Err(e) => {
                self.stats.local_load_errs.inc();
                return Err(e);
            }
        };
        self.stats.local_loads.inc();
        self.populate_cache(key, value.clone(), CacheType::Main);
        Ok(value)
    }

    async fn get_locally(&self, ctx: &Context, key: &str) -> Result<ByteView> {
        let mut sink = ByteViewSink::default();
        ctx.run(self.getter.get(ctx, key, &mut sink)).await??;
        sink.view()
    }

    async fn get_from_peer(&self, ctx: &Context, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let req = GetRequest {
            group: self.name.clone(),
            key: key.to_string(),
        };
        let resp = ctx.run(peer.get(ctx, req)).await??;
        let value = ByteView::from(resp.value);

        let promote = self.hot_promotion_ratio > 0.0 && rand::rng().random_bool(self.hot_promotion_ratio);
        if promote {
            self.populate_cache(key, value.clone(), CacheType::Hot);
        }
        Ok(value)
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes == 0 {
            return None;
        }
        self.main.get(key).or_else(|| self.hot.get(key))
    }

    /// Insert into a tier, then evict until both tiers fit the budget.
    ///
    /// The hot tier is the victim while it is larger than 1/8 of the main tier.
    fn populate_cache(&self, key: &str, value: ByteView, cache: CacheType) {
        if self.cache_bytes == 0 {
            return;
        }
        self.tier(cache).add(key, value);

        loop {
            let main = self.main.bytes();
            let hot = self.hot.bytes();
            if main + hot <= self.cache_bytes {
                return;
            }
            let victim = if hot > main / 8 { &self.hot } else { &self.main };
            victim.remove_oldest();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures_core::future::BoxFuture;
    use peercache_common::error::{Error, ErrorKind};
    use peercache_memory::StringSink;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        getter::getter_fn,
        peers::{GetResponse, NoPeers},
        registry::Registry,
    };

    /// Counts calls and returns `value-of-{key}`.
    fn counting_getter(calls: Arc<AtomicUsize>) -> impl Getter {
        getter_fn(move |_, key: String| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ByteView::from(format!("value-of-{key}")))
            }
        })
    }

    #[derive(Debug)]
    struct FakePeer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PeerGetter for FakePeer {
        fn get(&self, _: &Context, req: GetRequest) -> BoxFuture<'static, Result<GetResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(Error::new(ErrorKind::Peer, "connection refused"));
                }
                Ok(GetResponse {
                    value: format!("remote-{}", req.key).into_bytes(),
                    minute_qps: None,
                })
            })
        }
    }

    #[derive(Debug)]
    struct FakePicker {
        peer: Arc<FakePeer>,
    }

    impl FakePicker {
        fn new(fail: bool) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let peer = Arc::new(FakePeer {
                calls: calls.clone(),
                fail,
            });
            (Arc::new(Self { peer }), calls)
        }
    }

    impl PeerPicker for FakePicker {
        fn pick_peer(&self, _: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.peer.clone())
        }
    }

    async fn get_string(group: &Group, key: &str) -> Result<String> {
        let mut s = String::new();
        group
            .get(&Context::background(), key, &mut StringSink::new(&mut s))
            .await?;
        Ok(s)
    }

    #[test_log::test(tokio::test)]
    async fn test_second_get_hits_cache() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let group = registry.new_group("g", 1 << 20, counting_getter(calls.clone()));

        assert_eq!(get_string(&group, "k").await.unwrap(), "value-of-k");
        assert_eq!(get_string(&group, "k").await.unwrap(), "value-of-k");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.local_loads, 1);
        assert_eq!(group.cache_stats(CacheType::Main).items, 1);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_concurrent_gets_load_once() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let c = calls.clone();
        let r = release.clone();
        let group = registry.new_group(
            "g",
            1 << 20,
            getter_fn(move |_, key: String| {
                let c = c.clone();
                let r = r.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    r.notified().await;
                    Ok(ByteView::from(format!("value-of-{key}")))
                }
            }),
        );

        let handles = (0..16)
            .map(|_| {
                let group = group.clone();
                tokio::spawn(async move { get_string(&group, "k").await })
            })
            .collect::<Vec<_>>();

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value-of-k");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().loads_deduped, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_getter_error_propagates() {
        let registry = Registry::new();
        let group = registry.new_group(
            "g",
            1 << 20,
            getter_fn(|_, key: String| async move {
                Err::<ByteView, _>(Error::new(ErrorKind::External, "no such row").with_context("key", key))
            }),
        );

        let err = get_string(&group, "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert_eq!(err.message(), "no such row");
        assert_eq!(group.stats().local_load_errs, 1);
        assert_eq!(group.cache_stats(CacheType::Main).items, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_disabled_cache() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let group = registry.new_group("g", 0, counting_getter(calls.clone()));

        for _ in 0..3 {
            assert_eq!(get_string(&group, "k").await.unwrap(), "value-of-k");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(group.cache_stats(CacheType::Main).bytes, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_budget_respected() {
        const BUDGET: usize = 256;

        let registry = Registry::new();
        let group = registry.new_group("g", BUDGET, counting_getter(Arc::new(AtomicUsize::new(0))));

        for i in 0..100 {
            get_string(&group, &format!("key-{i}")).await.unwrap();
            let used = group.cache_stats(CacheType::Main).bytes + group.cache_stats(CacheType::Hot).bytes;
            assert!(used <= BUDGET, "used: {used}");
        }
        assert!(group.cache_stats(CacheType::Main).evictions > 0);
    }

    #[test]
    fn test_hot_tier_bias() {
        let registry = Registry::new();
        let group = registry.new_group("g", 1000, counting_getter(Arc::new(AtomicUsize::new(0))));
        let inner = &group.inner;

        // 8 main entries of 100 bytes each: "m{i}" + 98 bytes value.
        for i in 0..8 {
            inner.populate_cache(&format!("m{i}"), ByteView::from(vec![0u8; 98]), CacheType::Main);
        }
        assert_eq!(inner.main.bytes(), 800);

        // Each hot entry is 50 bytes. Once the total exceeds the budget, the hot tier is larger than main / 8 and
        // pays for it, so main stays untouched.
        for i in 0..20 {
            inner.populate_cache(&format!("h{i:02}"), ByteView::from(vec![0u8; 47]), CacheType::Hot);
            assert_eq!(inner.main.bytes(), 800);
            assert!(inner.main.bytes() + inner.hot.bytes() <= 1000);
        }
        assert!(inner.hot.stats().evictions > 0);
        assert_eq!(inner.main.stats().evictions, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_peer_failure_falls_back_to_main() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (picker, peer_calls) = FakePicker::new(true);
        let group = registry
            .group_builder("g")
            .with_cache_bytes(1 << 20)
            .with_getter(counting_getter(calls.clone()))
            .with_peer_picker(picker)
            .with_hot_promotion_ratio(1.0)
            .build();

        assert_eq!(get_string(&group, "k").await.unwrap(), "value-of-k");

        assert_eq!(peer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache_stats(CacheType::Main).items, 1);
        assert_eq!(group.cache_stats(CacheType::Hot).items, 0);
        assert_eq!(group.stats().peer_errors, 1);
    }

    /// Never answers. Gives up after its own timeout, like an HTTP peer with a request timeout.
    #[derive(Debug)]
    struct SilentPeer {
        timeout: Duration,
    }

    impl PeerGetter for SilentPeer {
        fn get(&self, ctx: &Context, _: GetRequest) -> BoxFuture<'static, Result<GetResponse>> {
            let ctx = ctx.clone().with_timeout(self.timeout);
            Box::pin(async move { ctx.run(std::future::pending::<GetResponse>()).await })
        }
    }

    impl PeerPicker for SilentPeer {
        fn pick_peer(&self, _: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(Arc::new(SilentPeer { timeout: self.timeout }))
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_caller_deadline_during_peer_fetch() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let group = registry
            .group_builder("g")
            .with_cache_bytes(1 << 20)
            .with_getter(counting_getter(calls.clone()))
            .with_peer_picker(Arc::new(SilentPeer {
                timeout: Duration::from_millis(60),
            }))
            .build();

        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let mut s = String::new();
        let err = group.get(&ctx, "k", &mut StringSink::new(&mut s)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(s.is_empty());

        // The peer times out on its own, then the load falls back to the getter.
        while !group.inner.flights.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().peer_errors, 1);
        assert_eq!(group.cache_stats(CacheType::Main).items, 1);
        assert_eq!(get_string(&group, "k").await.unwrap(), "value-of-k");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_caller_deadline_does_not_fail_others() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let group = registry.new_group(
            "g",
            1 << 20,
            getter_fn(move |_, key: String| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(ByteView::from(format!("slow-{key}")))
                }
            }),
        );

        let impatient = {
            let group = group.clone();
            tokio::spawn(async move {
                let ctx = Context::background().with_timeout(Duration::from_millis(30));
                let mut sink = ByteViewSink::default();
                group.get(&ctx, "k", &mut sink).await
            })
        };
        while group.inner.flights.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let patient = {
            let group = group.clone();
            tokio::spawn(async move { get_string(&group, "k").await })
        };

        let err = impatient.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(patient.await.unwrap().unwrap(), "slow-k");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().loads_deduped, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_peer_fetch_and_hot_promotion() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (picker, peer_calls) = FakePicker::new(false);
        let always = registry
            .group_builder("always")
            .with_cache_bytes(1 << 20)
            .with_getter(counting_getter(calls.clone()))
            .with_peer_picker(picker)
            .with_hot_promotion_ratio(1.0)
            .build();
        assert_eq!(get_string(&always, "k").await.unwrap(), "remote-k");
        assert_eq!(always.cache_stats(CacheType::Hot).items, 1);
        assert_eq!(always.cache_stats(CacheType::Main).items, 0);
        // Served by the hot tier now.
        assert_eq!(get_string(&always, "k").await.unwrap(), "remote-k");
        assert_eq!(peer_calls.load(Ordering::SeqCst), 1);

        let (picker, peer_calls) = FakePicker::new(false);
        let never = registry
            .group_builder("never")
            .with_cache_bytes(1 << 20)
            .with_getter(counting_getter(calls.clone()))
            .with_peer_picker(picker)
            .with_hot_promotion_ratio(0.0)
            .build();
        assert_eq!(get_string(&never, "k").await.unwrap(), "remote-k");
        assert_eq!(get_string(&never, "k").await.unwrap(), "remote-k");
        assert_eq!(peer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(never.cache_stats(CacheType::Hot).items, 0);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_peer_picker_resolved_from_registry() {
        let registry = Registry::new();
        let resolved = Arc::new(AtomicUsize::new(0));
        let r = resolved.clone();
        registry.register_per_group_peer_picker(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoPeers)
        });

        let group = registry.new_group("g", 1 << 20, counting_getter(Arc::new(AtomicUsize::new(0))));
        assert_eq!(resolved.load(Ordering::SeqCst), 0);

        get_string(&group, "a").await.unwrap();
        get_string(&group, "b").await.unwrap();
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_cancelled_caller() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let c = calls.clone();
        let r = release.clone();
        let group = registry.new_group(
            "g",
            1 << 20,
            getter_fn(move |_, _| {
                let c = c.clone();
                let r = r.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    r.notified().await;
                    Ok(ByteView::from("late"))
                }
            }),
        );

        let caller = Context::background();
        let first = {
            let group = group.clone();
            let caller = caller.clone();
            tokio::spawn(async move {
                let mut sink = ByteViewSink::default();
                group.get(&caller, "k", &mut sink).await
            })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        caller.cancel();
        let err = first.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        // The shared load keeps running, a later caller joins it.
        let second = {
            let group = group.clone();
            tokio::spawn(async move { get_string(&group, "k").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();
        assert_eq!(second.await.unwrap().unwrap(), "late");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "group g is built without a getter")]
    fn test_missing_getter() {
        Registry::new().group_builder("g").with_cache_bytes(1024).build();
    }

    #[test]
    #[should_panic(expected = "registry of group g is dropped before the group is built")]
    fn test_registry_dropped_before_build() {
        let builder = Registry::new().group_builder("g");
        builder.with_getter(counting_getter(Arc::default())).build();
    }
}
