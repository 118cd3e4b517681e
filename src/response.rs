//! Outgoing responses and the per-request response sink.
//!
//! Handlers never build hyper types. They write through the
//! [`ResponseWriter`] they are given:
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use sluice::{Context, Request, ResponseWriter};
//!
//! async fn get_employee(_ctx: Context, w: ResponseWriter, req: Request) -> Result<(), sluice::Error> {
//!     let id = req.param("id").unwrap_or_default();
//!     w.respond(StatusCode::OK, &serde_json::json!({ "id": id }))
//! }
//! ```
//!
//! The first write wins. Writing records the status into the request's
//! [`RequestState`](crate::RequestState), which is what the access log reads.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use parking_lot::Mutex;
use serde::Serialize;

use crate::classify::ErrorResponse;
use crate::context::Context;
use crate::error::Error;

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
#[derive(Clone, Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: HeaderMap,
    pub(crate) status: StatusCode,
}

impl Response {
    /// JSON-encodes `body` with `content-type: application/json`.
    ///
    /// `204 No Content` is special-cased: no body and no content type are
    /// written, whatever `body` is.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Result<Self, Error> {
        if status == StatusCode::NO_CONTENT {
            return Ok(Self::empty(status));
        }
        let bytes = serde_json::to_vec(body)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self { body: Bytes::from(bytes), headers, status })
    }

    /// Response with no body.
    pub fn empty(status: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: HeaderMap::new(), status }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Error envelope fallback used outside the handler chain. An
    /// [`ErrorResponse`] always encodes, so the empty branch is unreachable
    /// in practice.
    pub(crate) fn error(status: StatusCode, body: &ErrorResponse) -> Self {
        Self::json(status, body).unwrap_or_else(|_| Self::empty(status))
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The response sink of one request.
///
/// Cloning yields another handle to the same slot; the router keeps one to
/// collect the response once the chain returns.
#[derive(Clone, Debug)]
pub struct ResponseWriter {
    ctx: Context,
    slot: Arc<Mutex<Option<Response>>>,
}

impl ResponseWriter {
    pub fn new(ctx: &Context) -> Self {
        Self { ctx: ctx.clone(), slot: Arc::new(Mutex::new(None)) }
    }

    /// Writes `body` as JSON with `status`. See [`Response::json`].
    pub fn respond<T: Serialize + ?Sized>(&self, status: StatusCode, body: &T) -> Result<(), Error> {
        self.send(Response::json(status, body)?)
    }

    /// Writes `204 No Content`.
    pub fn no_content(&self) -> Result<(), Error> {
        self.send(Response::empty(StatusCode::NO_CONTENT))
    }

    /// Writes a fully built response.
    ///
    /// Fails with [`Error::AlreadyWritten`] if a response is already in the slot.
    pub fn send(&self, response: Response) -> Result<(), Error> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(Error::AlreadyWritten);
        }
        self.ctx.state().set_status(response.status);
        *slot = Some(response);
        Ok(())
    }

    pub fn is_written(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn take(&self) -> Option<Response> {
        self.slot.lock().take()
    }
}
