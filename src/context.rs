//! Request-scoped context.
//!
//! Every dispatch builds one [`Context`] and hands a clone of it to each layer
//! of the handler chain. It carries the per-request [`RequestState`] plus the
//! identity of the request. Nothing in it outlives the dispatch, and no two
//! requests ever share one.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use http::StatusCode;

/// Mutable per-request state.
///
/// The status slot is write-once: it stays unset until a response is
/// written and never changes afterwards.
#[derive(Debug)]
pub struct RequestState {
    status: OnceLock<StatusCode>,
    started_at: Instant,
}

impl RequestState {
    pub fn new() -> Self {
        Self { status: OnceLock::new(), started_at: Instant::now() }
    }

    /// The status of the written response, or `None` if nothing was written yet.
    pub fn status(&self) -> Option<StatusCode> {
        self.status.get().copied()
    }

    /// Returns `false` if a status was already recorded.
    pub(crate) fn set_status(&self, status: StatusCode) -> bool {
        self.status.set(status).is_ok()
    }

    pub fn started_at(&self) -> Instant { self.started_at }

    pub fn elapsed(&self) -> Duration { self.started_at.elapsed() }
}

impl Default for RequestState {
    fn default() -> Self { Self::new() }
}

/// Handle to the request-scoped context. Cloning is one atomic increment.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RequestState,
    request_id: String,
    remote_addr: Option<SocketAddr>,
    version: String,
}

impl Context {
    /// Creates a fresh context with a new [`RequestState`].
    pub fn new(request_id: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::with_version(request_id, remote_addr, "")
    }

    pub(crate) fn with_version(
        request_id: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RequestState::new(),
                request_id: request_id.into(),
                remote_addr,
                version: version.into(),
            }),
        }
    }

    pub fn state(&self) -> &RequestState { &self.inner.state }
    pub fn request_id(&self) -> &str { &self.inner.request_id }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.inner.remote_addr }

    /// API version of the matched route (`"v1"`), empty for unversioned routes.
    pub fn version(&self) -> &str { &self.inner.version }
}
