//! Access logging middleware.

use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::request::Request;
use crate::response::ResponseWriter;

use super::Middleware;

/// Logs every request twice under the `access` target: once on the way in
/// (method, path, remote address, request id) and once on the way out with
/// the final status and the elapsed time.
///
/// The status comes from the request's [`RequestState`](crate::RequestState);
/// if nothing wrote a response it is logged as `unset`. The inner result is
/// passed up untouched, errors included.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessLog;

impl AccessLog {
    pub fn new() -> Self { Self }
}

impl Middleware for AccessLog {
    fn name(&self) -> &'static str { "access_log" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(AccessLogHandler { next })
    }
}

struct AccessLogHandler {
    next: BoxedHandler,
}

impl ErasedHandler for AccessLogHandler {
    fn call(&self, ctx: Context, w: ResponseWriter, req: Request) -> BoxFuture<HandlerResult> {
        let next = Arc::clone(&self.next);
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.path().to_owned();
            let remote_addr = ctx.remote_addr().map(|a| a.to_string()).unwrap_or_default();

            info!(
                target: "access",
                request_id = ctx.request_id(),
                %method,
                %path,
                %remote_addr,
                "request started"
            );

            let result = next.call(ctx.clone(), w, req).await;

            let status = ctx.state().status()
                .map_or_else(|| "unset".to_owned(), |s| s.as_u16().to_string());
            info!(
                target: "access",
                request_id = ctx.request_id(),
                %method,
                %path,
                %remote_addr,
                %status,
                since = ?ctx.state().elapsed(),
                "request completed"
            );

            result
        })
    }
}
