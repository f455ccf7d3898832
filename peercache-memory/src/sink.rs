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

use peercache_common::error::Result;

use crate::view::ByteView;

/// Receives the value produced by a getter or served by a group.
///
/// After any `set_*` call, [`Sink::view`] must reflect exactly that value.
pub trait Sink: Send {
    /// Set the value from text.
    fn set_string(&mut self, value: String) -> Result<()>;

    /// Set the value from bytes. The sink must not retain `value`.
    fn set_bytes(&mut self, value: &[u8]) -> Result<()>;

    /// Get the current value.
    fn view(&self) -> Result<ByteView>;

    /// Expose the fast path for sinks that can take a [`ByteView`] as is.
    ///
    /// Default: `None`.
    fn as_view_setter(&mut self) -> Option<&mut dyn ViewSetter> {
        None
    }
}

/// Optional fast path of a [`Sink`] that avoids copying a value the caller already holds as a [`ByteView`].
pub trait ViewSetter {
    /// Set the value from a view.
    fn set_view(&mut self, view: ByteView) -> Result<()>;
}

/// Write `view` into `sink`, preferring the [`ViewSetter`] fast path when the sink offers one.
pub fn set_sink_view(sink: &mut dyn Sink, view: ByteView) -> Result<()> {
    if let Some(setter) = sink.as_view_setter() {
        return setter.set_view(view);
    }
    if view.is_text() {
        sink.set_string(view.to_string())
    } else {
        sink.set_bytes(view.as_slice())
    }
}

/// A sink that stores the value as a [`ByteView`].
#[derive(Debug, Default, Clone)]
pub struct ByteViewSink {
    view: ByteView,
}

impl ByteViewSink {
    /// Take the stored view.
    pub fn into_view(self) -> ByteView {
        self.view
    }
}

impl Sink for ByteViewSink {
    fn set_string(&mut self, value: String) -> Result<()> {
        self.view = ByteView::from(value);
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.view = ByteView::copy_from_slice(value);
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        Ok(self.view.clone())
    }

    fn as_view_setter(&mut self) -> Option<&mut dyn ViewSetter> {
        Some(self)
    }
}

impl ViewSetter for ByteViewSink {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        self.view = view;
        Ok(())
    }
}

/// A sink that writes the value into a `String`.
///
/// Byte values that are not valid UTF-8 are stored lossily.
#[derive(Debug)]
pub struct StringSink<'a> {
    dst: &'a mut String,
    view: ByteView,
}

impl<'a> StringSink<'a> {
    /// Create a sink writing into `dst`.
    pub fn new(dst: &'a mut String) -> Self {
        Self {
            dst,
            view: ByteView::default(),
        }
    }
}

impl Sink for StringSink<'_> {
    fn set_string(&mut self, value: String) -> Result<()> {
        self.dst.clone_from(&value);
        self.view = ByteView::from(value);
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8]) -> Result<()> {
        *self.dst = String::from_utf8_lossy(value).into_owned();
        self.view = ByteView::copy_from_slice(value);
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        Ok(self.view.clone())
    }
}

/// A sink that copies the value into a `Vec<u8>`, replacing its content.
#[derive(Debug)]
pub struct AllocatingByteSliceSink<'a> {
    dst: &'a mut Vec<u8>,
    view: ByteView,
}

impl<'a> AllocatingByteSliceSink<'a> {
    /// Create a sink writing into `dst`.
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        Self {
            dst,
            view: ByteView::default(),
        }
    }
}

impl Sink for AllocatingByteSliceSink<'_> {
    fn set_string(&mut self, value: String) -> Result<()> {
        *self.dst = value.as_bytes().to_vec();
        self.view = ByteView::from(value);
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8]) -> Result<()> {
        *self.dst = value.to_vec();
        self.view = ByteView::copy_from_slice(value);
        Ok(())
    }

    fn view(&self) -> Result<ByteView> {
        Ok(self.view.clone())
    }

    fn as_view_setter(&mut self) -> Option<&mut dyn ViewSetter> {
        Some(self)
    }
}

impl ViewSetter for AllocatingByteSliceSink<'_> {
    fn set_view(&mut self, view: ByteView) -> Result<()> {
        *self.dst = view.to_vec();
        self.view = view;
        Ok(())
    }
}

/// A sink that copies the value into a fixed size buffer, truncating it if it does not fit.
#[derive(Debug)]
pub struct TruncatingByteSliceSink<'a> {
    dst: &'a mut [u8],
    written: usize,
}

impl<'a> TruncatingByteSliceSink<'a> {
    /// Create a sink writing into `dst`.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, written: 0 }
    }

    /// Count of bytes written into the buffer by the last `set_*` call.
    pub fn written(&self) -> usize {
        self.written
    }

    fn write(&mut self, value: &[u8]) {
        let n = self.dst.len().min(value.len());
        self.dst[..n].copy_from_slice(&value[..n]);
        self.written = n;
    }
}

impl Sink for TruncatingByteSliceSink<'_> {
    fn set_string(&mut self, value: String) -> Result<()> {
        self.write(value.as_bytes());
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write(value);
        Ok(())
    }

    /// The view reflects the truncated content.
    fn view(&self) -> Result<ByteView> {
        Ok(ByteView::copy_from_slice(&self.dst[..self.written]))
    }
}
