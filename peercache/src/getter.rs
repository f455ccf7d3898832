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

use std::{fmt::Debug, future::Future};

use futures_core::future::BoxFuture;
use peercache_common::{context::Context, error::Result};
use peercache_memory::{set_sink_view, ByteView, Sink};

/// Loads the value of a key when no cache or peer has it.
///
/// The getter writes the value into `sink`. Errors are handed to every caller waiting for the key as is.
pub trait Getter: Send + Sync + 'static {
    /// Load `key` into `sink`.
    fn get<'a>(&'a self, ctx: &'a Context, key: &'a str, sink: &'a mut dyn Sink) -> BoxFuture<'a, Result<()>>;
}

/// A [`Getter`] built from an async closure that returns the value.
pub struct GetterFn<F> {
    f: F,
}

impl<F> Debug for GetterFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetterFn").finish()
    }
}

/// Create a [`Getter`] from an async closure.
///
/// ```
/// use peercache::{getter_fn, ByteView};
///
/// let getter = getter_fn(|_ctx, key: String| async move { Ok(ByteView::from(format!("value of {key}"))) });
/// # let _ = getter;
/// ```
pub fn getter_fn<F, FU>(f: F) -> GetterFn<F>
where
    F: Fn(Context, String) -> FU + Send + Sync + 'static,
    FU: Future<Output = Result<ByteView>> + Send + 'static,
{
    GetterFn { f }
}

impl<F, FU> Getter for GetterFn<F>
where
    F: Fn(Context, String) -> FU + Send + Sync + 'static,
    FU: Future<Output = Result<ByteView>> + Send + 'static,
{
    fn get<'a>(&'a self, ctx: &'a Context, key: &'a str, sink: &'a mut dyn Sink) -> BoxFuture<'a, Result<()>> {
        let future = (self.f)(ctx.clone(), key.to_string());
        Box::pin(async move {
            let value = future.await?;
            set_sink_view(sink, value)
        })
    }
}
