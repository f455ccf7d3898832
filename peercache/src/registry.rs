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
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, OnceLock, Weak},
};

use parking_lot::RwLock;

use crate::{
    getter::Getter,
    group::{Group, GroupBuilder},
    peers::{NoPeers, PeerPicker},
};

type PeerPickerFn = Box<dyn Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync>;
type NewGroupHook = Box<dyn Fn(&Group) + Send + Sync>;
type ServerStartHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    groups: RwLock<HashMap<String, Group>>,

    peer_picker: OnceLock<PeerPickerFn>,
    new_group_hook: OnceLock<NewGroupHook>,
    server_start: OnceLock<ServerStartHook>,
    server_started: OnceLock<()>,
}

/// Owns the groups of a process and the hooks that wire them to the peer transport.
///
/// Cloning a [`Registry`] is cheap and shares the same groups and hooks.
///
/// # Panics
///
/// Registering a group name twice or assigning a hook twice is a programming error and panics.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.inner.groups.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("Registry").field("groups", &names).finish()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group with the default configuration.
    pub fn new_group(&self, name: impl Into<String>, cache_bytes: usize, getter: impl Getter) -> Group {
        self.group_builder(name)
            .with_cache_bytes(cache_bytes)
            .with_getter(getter)
            .build()
    }

    /// Start building a group owned by this registry.
    pub fn group_builder(&self, name: impl Into<String>) -> GroupBuilder {
        GroupBuilder::new(name, self.downgrade())
    }

    /// Look up a group by name.
    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.inner.groups.read().get(name).cloned()
    }

    /// Register the peer picker shared by all groups that were not built with their own.
    pub fn register_peer_picker<F>(&self, f: F)
    where
        F: Fn() -> Arc<dyn PeerPicker> + Send + Sync + 'static,
    {
        self.set_peer_picker(Box::new(move |_| f()));
    }

    /// Register a peer picker that is chosen per group name.
    pub fn register_per_group_peer_picker<F>(&self, f: F)
    where
        F: Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync + 'static,
    {
        self.set_peer_picker(Box::new(f));
    }

    fn set_peer_picker(&self, f: PeerPickerFn) {
        if self.inner.peer_picker.set(f).is_err() {
            panic!("peer picker registered more than once");
        }
    }

    /// Register a hook that is called for every group created afterwards.
    pub fn register_new_group_hook<F>(&self, f: F)
    where
        F: Fn(&Group) + Send + Sync + 'static,
    {
        if self.inner.new_group_hook.set(Box::new(f)).is_err() {
            panic!("new group hook registered more than once");
        }
    }

    /// Register a hook that is called once, right before the first group is created.
    pub fn register_server_start<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.inner.server_start.set(Box::new(f)).is_err() {
            panic!("server start hook registered more than once");
        }
    }

    /// Resolve the peer picker of the group `name`.
    pub(crate) fn peer_picker(&self, name: &str) -> Arc<dyn PeerPicker> {
        match self.inner.peer_picker.get() {
            Some(f) => f(name),
            None => Arc::new(NoPeers),
        }
    }

    pub(crate) fn register(&self, group: Group) {
        self.inner.server_started.get_or_init(|| {
            if let Some(f) = self.inner.server_start.get() {
                f();
            }
        });

        {
            let mut groups = self.inner.groups.write();
            if groups.contains_key(group.name()) {
                panic!("duplicate registration of group {}", group.name());
            }
            groups.insert(group.name().to_string(), group.clone());
        }

        tracing::debug!(name = group.name(), "[registry]: new group");

        if let Some(f) = self.inner.new_group_hook.get() {
            f(&group);
        }
    }

    /// Create a handle that does not keep the registry alive.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A [`Registry`] handle that does not keep it alive.
///
/// Groups and peer bindings refer back to their registry through it, so that the registry can own them.
#[derive(Debug, Clone, Default)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    /// Get the registry if it is still alive.
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}
