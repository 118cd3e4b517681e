//! Error types.
//!
//! Two families live here:
//!
//! - [`Error`]: infrastructure failures surfaced by sluice itself: binding a
//!   port, a dead listener, a drain that ran out of time, a bad route pattern.
//! - Handler errors: [`FieldErrors`], [`RequestError`] and [`ShutdownError`].
//!   Handlers return them (or anything else) as a [`BoxError`]; the
//!   [`ErrorTranslation`](crate::middleware::ErrorTranslation) middleware
//!   turns them into client-visible JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use http::StatusCode;

use crate::config::ConfigError;

/// A type-erased handler error. `?` converts any `std::error::Error` into it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by sluice's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The listener died while serving. No drain was attempted.
    #[error("server error: {0}")]
    Server(#[source] std::io::Error),

    /// The bounded drain did not finish cleanly.
    #[error("could not stop server gracefully: {0}")]
    GracefulStop(#[source] Box<Error>),

    #[error("drain timed out after {timeout:?}, force-closed {open} connection(s)")]
    ForcedClose { timeout: Duration, open: usize },

    #[error("invalid route `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("response already written")]
    AlreadyWritten,

    #[error("encoding response body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn invalid_route(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRoute { pattern: pattern.to_owned(), reason: reason.into() }
    }
}

// ── Handler errors ────────────────────────────────────────────────────────────

/// Field-level validation failures: field name → message.
///
/// Rendered as `400` with `{"error":"data validation error","fields":{…}}`.
///
/// ```rust
/// use sluice::FieldErrors;
///
/// let errs = FieldErrors::new()
///     .with("first_name", "required")
///     .with("hire_date", "must be in the past");
/// assert_eq!(errs.len(), 2);
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq, thiserror::Error)]
#[error("data validation error: {} field(s) rejected", .0.len())]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(field, message);
        self
    }

    /// Records a failure. A second message for the same field replaces the first.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn fields(&self) -> &BTreeMap<String, String> { &self.0 }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An error the handler has already mapped to a status code.
///
/// The message is sent to the client verbatim as `{"error": <message>}`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    status: StatusCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl RequestError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), source: None }
    }

    /// Wraps `err`, using its `Display` text as the client-visible message.
    pub fn wrap(status: StatusCode, err: impl Into<BoxError>) -> Self {
        let source = err.into();
        Self { status, message: source.to_string(), source: Some(source) }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
}

/// Asks the process to shut down.
///
/// The client still receives a `500`; the error then travels past the
/// error-translation layer to the router, which signals the shutdown
/// coordinator.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("shutdown requested: {reason}")]
pub struct ShutdownError {
    reason: String,
}

impl ShutdownError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str { &self.reason }
}
