//! # sluice
//!
//! A small HTTP request-dispatch core for JSON services.
//!
//! - Versioned routing: `(method, "v1", "/employee/:id")` via [`matchit`]
//! - An ordered middleware chain around every handler, folded once at
//!   registration
//! - One place where handler errors become responses, see
//!   [`middleware::ErrorTranslation`]: validation errors are `400` with
//!   per-field messages, request errors keep their status, anything else
//!   is a `500` that never leaks its cause
//! - Graceful shutdown on SIGINT / SIGTERM, a handler's [`ShutdownError`], or
//!   a listener failure, with a bounded drain
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use sluice::middleware::{AccessLog, ErrorTranslation};
//! use sluice::{App, Context, FieldErrors, Method, Request, RequestError, ResponseWriter, Server, shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice::Error> {
//!     let (handle, events) = shutdown::channel();
//!     let app = App::new(handle)
//!         .layer(AccessLog::new())
//!         .layer(ErrorTranslation::new())
//!         .handle(Method::Get,  "v1", "/employee/:id", get_employee)
//!         .handle(Method::Post, "v1", "/employee",     create_employee);
//!
//!     Server::bind("0.0.0.0:3000").await?.serve(app, events).await
//! }
//!
//! async fn get_employee(_ctx: Context, w: ResponseWriter, req: Request) -> Result<(), sluice::BoxError> {
//!     let id: u64 = req.param("id")
//!         .and_then(|id| id.parse().ok())
//!         .ok_or_else(|| RequestError::bad_request("id must be a number"))?;
//!     w.respond(StatusCode::OK, &serde_json::json!({ "id": id }))?;
//!     Ok(())
//! }
//!
//! async fn create_employee(_ctx: Context, w: ResponseWriter, req: Request) -> Result<(), sluice::BoxError> {
//!     let body: serde_json::Value = req.json()?;
//!     if body.get("first_name").is_none() {
//!         return Err(FieldErrors::new().with("first_name", "required").into());
//!     }
//!     w.respond(StatusCode::CREATED, &body)?;
//!     Ok(())
//! }
//! ```

mod classify;
mod config;
mod context;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod logging;
pub mod middleware;
pub mod shutdown;

pub use classify::{ClassifiedError, ErrorResponse};
pub use config::{Config, ConfigError};
pub use context::{Context, RequestState};
pub use error::{BoxError, Error, FieldErrors, RequestError, ShutdownError};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerResult};
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{Response, ResponseWriter};
pub use router::{App, REQUEST_ID};
pub use server::Server;
