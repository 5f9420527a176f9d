//! Error taxonomy and the crate-wide result type.
//!
//! Every fallible operation in this crate returns [`Result`], whose error arm
//! is an [`ErrorInfo`]: an error code plus a process-unique identifier, the
//! source location where the error was constructed, an optional message, and
//! ordered key/value diagnostic pairs. Intermediate callers enrich an error
//! with [`ErrorInfo::add_pair`] before propagating it with `?`, so by the time
//! an error reaches a log sink it carries context from every layer it crossed.
//!
//! # Example
//!
//! ```
//! use wiremux::{ErrorCode, ErrorInfo, Result};
//!
//! fn lookup(name: &str) -> Result<u32> {
//!     Err(ErrorInfo::new(ErrorCode::Parameter)
//!         .with_message("unknown name")
//!         .add_pair("name", name))
//! }
//!
//! fn lookup_twice(name: &str) -> Result<u32> {
//!     // Enrich and re-propagate; the error id and code are preserved.
//!     lookup(name).map_err(|e| e.add_pair("caller", "lookup_twice"))
//! }
//!
//! let err = lookup_twice("x").unwrap_err();
//! assert_eq!(err.code(), ErrorCode::Parameter);
//! assert_eq!(err.values("name").count(), 1);
//! ```

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Error codes, grouped into categories.
///
/// The general category covers caller mistakes (`Parameter`), unexpected
/// statuses from external libraries (`ThirdParty`) and invariant violations
/// (`Internal`). The network category has a single condition: every flavor of
/// connection teardown (remote close, local shutdown, OS-level abort) is
/// reported as `ConnectionClosed`. `Backend` wraps a native client library's
/// error code verbatim, as produced by polling-engine adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    /// Malformed input; the caller's fault. Not worth retrying.
    #[error("parameter error")]
    Parameter,
    /// An external library returned an unexpected status.
    #[error("third party error")]
    ThirdParty,
    /// Invariant violation; treat as a bug signal.
    #[error("internal error")]
    Internal,
    /// The connection is gone, whichever side closed it.
    #[error("connection closed")]
    ConnectionClosed,
    /// A native client's error code, surfaced verbatim.
    #[error("backend error {0}")]
    Backend(i32),
}

impl ErrorCode {
    /// Category name for log output.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::Parameter | ErrorCode::ThirdParty | ErrorCode::Internal => "general",
            ErrorCode::ConnectionClosed => "network",
            ErrorCode::Backend(_) => "backend",
        }
    }

    /// Numeric code within the category.
    pub fn raw_code(&self) -> i32 {
        match self {
            ErrorCode::Parameter => -1,
            ErrorCode::ThirdParty => -2,
            ErrorCode::Internal => -3,
            ErrorCode::ConnectionClosed => 1,
            ErrorCode::Backend(code) => *code,
        }
    }
}

/// Issue the next process-wide unique error id. Never returns 0.
fn next_error_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A fully-annotated error.
///
/// Constructed at the failure site (capturing the caller's source location
/// via `#[track_caller]`), then optionally enriched with a message and
/// diagnostic pairs using the builder-style methods, and finally propagated
/// by move. Cloning duplicates the whole annotation set, id included.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    error_id: u64,
    code: ErrorCode,
    location: &'static Location<'static>,
    message: Option<String>,
    pairs: Vec<(String, String)>,
}

impl ErrorInfo {
    /// Create a new error with a fresh unique id.
    #[track_caller]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error_id: next_error_id(),
            code,
            location: Location::caller(),
            message: None,
            pairs: Vec::new(),
        }
    }

    /// Attach a human-readable message. Replaces any previous message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Append a diagnostic pair.
    ///
    /// The same key may be appended at multiple propagation layers; all
    /// values are kept, in insertion order.
    pub fn add_pair(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.pairs.push((key.into(), value.to_string()));
        self
    }

    /// The process-unique id. Nonzero for every constructed error.
    pub fn error_id(&self) -> u64 {
        self.error_id
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Source location where the error was constructed.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The optional message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// All diagnostic pairs, in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// All values recorded for `key`, in insertion order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Multi-line rendering for standalone log output.
    pub fn report(&self) -> String {
        use fmt::Write;

        let mut out = String::new();
        let _ = write!(out, "error_id: {}", self.error_id);
        let _ = write!(out, "\nerror_num: {}", self.code.raw_code());
        let _ = write!(out, "\nerror_name: {}", self.code);
        let _ = write!(out, "\nerror_category: {}", self.code.category());
        let _ = write!(
            out,
            "\nlocation: {}:{}",
            self.location.file(),
            self.location.line()
        );
        if let Some(message) = &self.message {
            let _ = write!(out, "\nerror_message: {message}");
        }
        for (key, value) in &self.pairs {
            let _ = write!(out, "\n{key}: {value}");
        }
        out
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[error_id={},error_num={},error_name={},error_category={},line={},file={}",
            self.error_id,
            self.code.raw_code(),
            self.code,
            self.code.category(),
            self.location.line(),
            self.location.file(),
        )?;
        if let Some(message) = &self.message {
            write!(f, ",error_message={message}")?;
        }
        for (key, value) in &self.pairs {
            write!(f, ",{key}={value}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for ErrorInfo {}

/// Result type alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, ErrorInfo>;
