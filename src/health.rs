//! Health-check handlers for orchestrator probes.
//!
//! | Probe         | Question                        | On failure                 |
//! |---------------|---------------------------------|----------------------------|
//! | **Liveness**  | Is the process alive?           | restart                    |
//! | **Readiness** | Can the instance take traffic?  | pulled from load balancing |
//!
//! ```rust,no_run
//! use sluice::{App, Method, health, shutdown};
//!
//! let (handle, _events) = shutdown::channel();
//! let app = App::new(handle)
//!     .handle(Method::Get, "v1", "/liveness", health::liveness)
//!     .handle(Method::Get, "v1", "/readiness", health::readiness);
//! ```
//!
//! Register your own readiness handler instead if the service must gate on a
//! dependency such as a database connection.

use http::StatusCode;
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseWriter;

#[derive(Serialize)]
struct Probe<'a> {
    status: &'static str,
    version: &'a str,
}

/// Always `200 {"status":"ok"}`.
pub async fn liveness(ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    w.respond(StatusCode::OK, &Probe { status: "ok", version: ctx.version() })
}

/// `200 {"status":"ready"}` with the version the route is mounted under.
pub async fn readiness(ctx: Context, w: ResponseWriter, _req: Request) -> Result<(), Error> {
    w.respond(StatusCode::OK, &Probe { status: "ready", version: ctx.version() })
}
