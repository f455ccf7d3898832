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
    backtrace::Backtrace,
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

/// What went wrong, coarse enough to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local I/O failed.
    Io,
    /// A user supplied getter failed.
    External,
    /// A remote peer could not be reached or answered badly.
    ///
    /// A peer error only surfaces when there is no local fallback.
    Peer,
    /// The group or key does not exist.
    NotFound,
    /// A request was malformed.
    InvalidArgument,
    /// Bytes on the wire could not be decoded.
    Parse,
    /// The waiting caller was cancelled or ran past its deadline.
    Cancelled,
    /// The shared load was dropped or panicked before producing a result.
    TaskCancelled,
}

impl ErrorKind {
    /// Human readable name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "I/O error",
            Self::External => "getter error",
            Self::Peer => "peer error",
            Self::NotFound => "not found",
            Self::InvalidArgument => "invalid argument",
            Self::Parse => "parse error",
            Self::Cancelled => "cancelled",
            Self::TaskCancelled => "load aborted",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned by every fallible peercache operation.
///
/// One load result is handed to every caller waiting on the same key, so [`Error`] clones cheaply: the source and
/// the backtrace sit behind an [`Arc`].
///
/// `Display` prints one line, e.g.
///
/// ```text
/// peer error: peer returned non-200 status [url=http://10.0.0.2/_peercache/g/k, status=503]
/// ```
///
/// `Debug` adds the source chain and the captured backtrace on separate lines.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    fields: Vec<(&'static str, String)>,
    source: Option<Arc<anyhow::Error>>,
    backtrace: Arc<Backtrace>,
}

impl Error {
    /// Create an error of `kind`.
    ///
    /// ```rust
    /// # use peercache_common::error::{Error, ErrorKind};
    /// let err = Error::new(ErrorKind::NotFound, "no such group").with_context("group", "thumbnails");
    /// assert_eq!(err.to_string(), "not found: no such group [group=thumbnails]");
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: vec![],
            source: None,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Wrap an error raised by user code.
    pub fn external(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::External, "").with_source(source)
    }

    /// Attach a `key=value` field.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    /// Attach the underlying error. Only one source may be attached.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "error source attached twice");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message of the error, empty if only the source describes it.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fields attached with [`Error::with_context`], in insertion order.
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    /// The attached source error, if any.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Backtrace captured when the error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Borrow the source as `E` if that is its concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source()?.downcast_ref()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if !self.fields.is_empty() {
            let fields = self
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " [{fields}]")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("fields", &self.fields)
                .field("source", &self.source)
                .finish_non_exhaustive();
        }

        writeln!(f, "{self}")?;
        if let Some(source) = &self.source {
            for cause in source.chain().skip(1) {
                writeln!(f, "  caused by: {cause}")?;
            }
        }
        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            writeln!(f, "backtrace:\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref().as_ref())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, "").with_source(e)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(e) => e.into(),
            e => Self::new(ErrorKind::Parse, "").with_source(e),
        }
    }
}

/// Result type for peercache.
pub type Result<T> = std::result::Result<T, Error>;
