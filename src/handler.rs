//! Handler trait and type erasure.
//!
//! # The handler contract
//!
//! A handler receives the request-scoped [`Context`], the request's
//! [`ResponseWriter`] and the [`Request`] itself, writes its response through
//! the writer and returns `Ok(())`, or returns an error and leaves rendering
//! to the error-translation middleware:
//!
//! ```text
//! async fn get(ctx: Context, w: ResponseWriter, req: Request) -> Result<(), E>
//! ```
//!
//! # How handlers are stored
//!
//! The router holds handlers of *different* types in one table, so each is
//! erased behind [`ErasedHandler`]:
//!
//! ```text
//! async fn get_employee(…) -> Result<(), E>     ← user writes this
//!        ↓ app.handle(Method::Get, "v1", "/employee/:id", get_employee)
//! get_employee.into_boxed_handler()             ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_employee))             ← stored as BoxedHandler
//!        ↓ middleware.wrap(…) for every layer, innermost first
//! chain.call(ctx, w, req) at request time       ← one vtable call per layer
//! ```
//!
//! Middleware speaks [`BoxedHandler`] directly: it takes one and returns one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;
use crate::request::Request;
use crate::response::ResponseWriter;

/// What every layer of a handler chain resolves to.
pub type HandlerResult = Result<(), BoxError>;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio move it across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Dispatch interface shared by business handlers and middleware layers.
///
/// Implement this when writing a [`Middleware`](crate::middleware::Middleware):
/// the wrapping layer is itself an `ErasedHandler` holding the next one.
pub trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context, w: ResponseWriter, req: Request) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any function or
/// closure with the signature:
///
/// ```text
/// Fn(Context, ResponseWriter, Request) -> impl Future<Output = Result<(), E>>
/// where E: Into<BoxError>
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, E> private::Sealed for F
where
    F: Fn(Context, ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
}

impl<F, Fut, E> Handler for F
where
    F: Fn(Context, ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Context, ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, ctx: Context, w: ResponseWriter, req: Request) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(ctx, w, req);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
