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

use std::{fmt::Debug, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use hashbrown::hash_map::{EntryRef, HashMap};
use parking_lot::Mutex;
use peercache_common::{
    context::Context,
    error::{Error, ErrorKind, Result},
};
use tokio::sync::oneshot;

/// Sends the shared result to one waiting caller.
pub type Notifier<T> = oneshot::Sender<Result<T>>;
/// Receives the shared result of a flight.
pub type Waiter<T> = oneshot::Receiver<Result<T>>;

/// The role of a caller in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// The caller launched the shared task.
    Leader,
    /// The caller joined a task that was already in flight.
    Follower,
}

/// Deduplicates concurrent executions by key.
///
/// While a task for a key is in flight, later callers for the same key join it instead of launching their own. All
/// callers receive a clone of the same result. The record is removed before the result is delivered, so a call that
/// arrives after that launches a fresh task.
///
/// The task runs on its own tokio task. A caller that stops waiting does not abort the task for the others.
pub struct FlightGroup<T> {
    inflights: Arc<Mutex<HashMap<String, Vec<Notifier<T>>>>>,
}

impl<T> Debug for FlightGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup")
            .field("inflights", &self.inflights.lock().len())
            .finish()
    }
}

impl<T> Default for FlightGroup<T> {
    fn default() -> Self {
        Self {
            inflights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for FlightGroup<T> {
    fn clone(&self) -> Self {
        Self {
            inflights: self.inflights.clone(),
        }
    }
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + 'static,
{
    /// Create an empty flight group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of keys in flight.
    pub fn len(&self) -> usize {
        self.inflights.lock().len()
    }

    /// Returns `true` if no key is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the flight of `key`, or launch it with the future built by `f` if there is none.
    ///
    /// `f` is only called by the leader. It must not call back into this flight group.
    pub fn enqueue<F, FU>(&self, key: &str, f: F) -> (Flight, Waiter<T>)
    where
        F: FnOnce() -> FU,
        FU: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let future = {
            let mut inflights = self.inflights.lock();
            match inflights.entry_ref(key) {
                EntryRef::Occupied(mut o) => {
                    o.get_mut().push(tx);
                    return (Flight::Follower, rx);
                }
                EntryRef::Vacant(v) => {
                    let future = f();
                    v.insert(vec![tx]);
                    future
                }
            }
        };

        let inflights = self.inflights.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let res = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(res) => res,
                Err(_) => {
                    tracing::error!(%key, "[flight]: task panicked");
                    Err(Error::new(ErrorKind::TaskCancelled, "flight task panicked").with_context("key", &key))
                }
            };
            let notifiers = inflights.lock().remove(&key).unwrap_or_default();
            for notifier in notifiers {
                let _ = notifier.send(res.clone());
            }
        });

        (Flight::Leader, rx)
    }

    /// Execute the future built by `f` once for all concurrent callers of `key` and wait for the shared result.
    pub async fn execute<F, FU>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> FU,
        FU: Future<Output = Result<T>> + Send + 'static,
    {
        self.execute_with(&Context::background(), key, f).await
    }

    /// Same as [`FlightGroup::execute`], but stop waiting when `ctx` is cancelled.
    ///
    /// Cancelling `ctx` only releases this caller. The shared task keeps running for the others.
    pub async fn execute_with<F, FU>(&self, ctx: &Context, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> FU,
        FU: Future<Output = Result<T>> + Send + 'static,
    {
        let (_, waiter) = self.enqueue(key, f);
        wait(ctx, waiter).await
    }
}

/// Wait for the result of a flight, or until `ctx` is cancelled.
pub async fn wait<T>(ctx: &Context, waiter: Waiter<T>) -> Result<T> {
    match ctx.run(waiter).await? {
        Ok(res) => res,
        Err(_) => Err(Error::new(ErrorKind::TaskCancelled, "flight task dropped")),
    }
}
