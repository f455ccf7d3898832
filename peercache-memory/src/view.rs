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
    fmt::{Debug, Display},
    io::Read,
};

use bytes::{Buf, Bytes};

#[derive(Clone)]
enum Repr {
    Bytes(Bytes),
    /// Always valid UTF-8.
    Text(Bytes),
}

/// An immutable snapshot of a cached value.
///
/// A [`ByteView`] holds either bytes or text. Cloning is cheap: the underlying buffer is reference counted and never
/// mutated after construction.
///
/// Bytes borrowed from the caller are copied on construction, and [`ByteView::to_vec`] hands out a fresh copy, so
/// neither side can corrupt the cached value.
#[derive(Clone)]
pub struct ByteView {
    repr: Repr,
}

impl Default for ByteView {
    fn default() -> Self {
        Self {
            repr: Repr::Bytes(Bytes::new()),
        }
    }
}

impl ByteView {
    /// Create a view by copying the given bytes.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            repr: Repr::Bytes(Bytes::copy_from_slice(data)),
        }
    }

    fn buf(&self) -> &Bytes {
        match &self.repr {
            Repr::Bytes(b) | Repr::Text(b) => b,
        }
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.buf().len()
    }

    /// Returns `true` if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.buf().is_empty()
    }

    /// Returns `true` if the view was built from text.
    pub fn is_text(&self) -> bool {
        matches!(self.repr, Repr::Text(_))
    }

    /// Borrow the content.
    pub fn as_slice(&self) -> &[u8] {
        self.buf()
    }

    /// Copy the content into a freshly allocated vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf().to_vec()
    }

    /// Copy the content into `dst`, returning the count of bytes copied.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.buf()[..n]);
        n
    }

    /// Get the byte at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn at(&self, index: usize) -> u8 {
        self.buf()[index]
    }

    /// Get a sub view of `[from, to)` sharing the same buffer.
    ///
    /// A text view stays text only if both ends fall on character boundaries.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn slice(&self, from: usize, to: usize) -> Self {
        let repr = match &self.repr {
            Repr::Text(b) if std::str::from_utf8(&b[from..to]).is_ok() => Repr::Text(b.slice(from..to)),
            Repr::Bytes(b) | Repr::Text(b) => Repr::Bytes(b.slice(from..to)),
        };
        Self { repr }
    }

    /// Returns `true` if the view has the same content as `data`.
    pub fn equal_bytes(&self, data: &[u8]) -> bool {
        self.buf().as_ref() == data
    }

    /// Returns `true` if the view has the same content as `s`.
    pub fn equal_str(&self, s: &str) -> bool {
        self.equal_bytes(s.as_bytes())
    }

    /// Get a reader over the content.
    pub fn reader(&self) -> impl Read {
        self.buf().clone().reader()
    }
}

impl Display for ByteView {
    /// Non UTF-8 content is replaced with `U+FFFD`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.buf()))
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Bytes(b) => f.debug_tuple("ByteView::Bytes").field(b).finish(),
            Repr::Text(_) => f.debug_tuple("ByteView::Text").field(&self.to_string()).finish(),
        }
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.buf() == other.buf()
    }
}

impl Eq for ByteView {}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<Vec<u8>> for ByteView {
    /// Takes the ownership of the buffer. The caller can no longer mutate it, so no copy is needed.
    fn from(data: Vec<u8>) -> Self {
        Self {
            repr: Repr::Bytes(Bytes::from(data)),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        Self {
            repr: Repr::Bytes(data),
        }
    }
}

impl From<String> for ByteView {
    fn from(s: String) -> Self {
        Self {
            repr: Repr::Text(Bytes::from(s)),
        }
    }
}

impl From<&'static str> for ByteView {
    fn from(s: &'static str) -> Self {
        Self {
            repr: Repr::Text(Bytes::from_static(s.as_bytes())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_construct() {
        let mut src = vec![0x01, 0x02, 0x03];
        let view = ByteView::from(src.as_slice());

        src[0] = 0xff;
        assert_eq!(view.to_vec(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_copy_on_read() {
        let view = ByteView::from(vec![0x01, 0x02, 0x03]);

        let mut out = view.to_vec();
        out[0] = 0xff;
        assert_eq!(view.to_vec(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_text() {
        let view = ByteView::from("hello".to_string());
        assert!(view.is_text());
        assert_eq!(view.len(), 5);
        assert_eq!(view.to_string(), "hello");
        assert!(view.equal_str("hello"));
        assert_eq!(view, ByteView::from(b"hello".as_slice()));
    }

    #[test]
    fn test_slice_and_at() {
        let view = ByteView::from("héllo");
        assert_eq!(view.at(0), b'h');

        // Cuts the two-byte 'é' in half.
        let sub = view.slice(0, 2);
        assert!(!sub.is_text());
        assert!(sub.equal_bytes(&[b'h', 0xc3]));

        let sub = view.slice(3, 6);
        assert!(sub.is_text());
        assert_eq!(sub.to_string(), "llo");
    }

    #[test]
    fn test_copy_to_truncates() {
        let view = ByteView::from("abcdef");
        let mut dst = [0u8; 4];
        assert_eq!(view.copy_to(&mut dst), 4);
        assert_eq!(&dst, b"abcd");
    }

    #[test]
    fn test_reader() {
        let view = ByteView::from(vec![1, 2, 3, 4]);
        let mut buf = vec![];
        view.reader().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }
}
