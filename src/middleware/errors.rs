//! Error-translation middleware.
//!
//! The single place where handler errors become client responses. Nothing
//! else in the chain writes an error body.

use std::sync::Arc;

use tracing::{error, warn};

use crate::classify::ClassifiedError;
use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::request::Request;
use crate::response::ResponseWriter;

use super::Middleware;

/// Catches errors coming out of the inner chain, logs them, and writes the
/// classified JSON envelope through the response sink.
///
/// A [`ShutdownError`](crate::ShutdownError) is written to the client like
/// any other `500` and then returned to the caller so it reaches the router,
/// which asks the process to shut down. Every other error stops here.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorTranslation;

impl ErrorTranslation {
    pub fn new() -> Self { Self }
}

impl Middleware for ErrorTranslation {
    fn name(&self) -> &'static str { "error_translation" }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(ErrorTranslationHandler { next })
    }
}

struct ErrorTranslationHandler {
    next: BoxedHandler,
}

impl ErasedHandler for ErrorTranslationHandler {
    fn call(&self, ctx: Context, w: ResponseWriter, req: Request) -> BoxFuture<HandlerResult> {
        let next = Arc::clone(&self.next);
        Box::pin(async move {
            let Err(err) = next.call(ctx.clone(), w.clone(), req).await else {
                return Ok(());
            };

            let classified = ClassifiedError::classify(&*err);
            error!(
                request_id = ctx.request_id(),
                kind = classified.kind(),
                status = classified.status().as_u16(),
                error = %err,
                "handler error"
            );

            if w.is_written() {
                warn!(request_id = ctx.request_id(), "response already written, error body dropped");
            } else {
                w.respond(classified.status(), &classified.body())?;
            }

            if classified.is_shutdown() {
                return Err(err);
            }
            Ok(())
        })
    }
}
