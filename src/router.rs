//! The application router.
//!
//! One radix tree per HTTP method, keyed by the version-prefixed path. Every
//! stored handler is already wrapped in the full middleware chain, so
//! dispatch is a lookup plus one call.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use http::header::{HeaderName, HeaderValue};
use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::classify::{ClassifiedError, ErrorResponse};
use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::{Response, ResponseWriter};
use crate::shutdown::ShutdownHandle;

/// Header carrying the request id, echoed on every response.
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Characters that would turn a literal segment into a matchit wildcard or
/// parameter.
const RESERVED: [char; 3] = ['*', '{', '}'];

#[derive(Clone)]
struct Route {
    handler: BoxedHandler,
    version: Arc<str>,
}

/// The application: routes, the middleware list, and the way back to the
/// shutdown coordinator.
///
/// Build it once at startup and hand it to [`Server::serve`](crate::Server::serve);
/// it is read-only from then on. Each builder call returns `self` so
/// registrations chain naturally:
///
/// ```rust,no_run
/// use sluice::middleware::{AccessLog, ErrorTranslation};
/// use sluice::{App, Context, Method, Request, ResponseWriter, shutdown};
/// # async fn get_employee(_: Context, w: ResponseWriter, _: Request) -> Result<(), sluice::Error> { w.no_content() }
/// # async fn create_employee(_: Context, w: ResponseWriter, _: Request) -> Result<(), sluice::Error> { w.no_content() }
///
/// let (handle, _events) = shutdown::channel();
/// let app = App::new(handle)
///     .layer(AccessLog::new())
///     .layer(ErrorTranslation::new())
///     .handle(Method::Get,  "v1", "/employee/:id", get_employee)
///     .handle(Method::Post, "v1", "/employee",     create_employee);
/// ```
pub struct App {
    routes: HashMap<Method, MatchitRouter<Route>>,
    middleware: Vec<Arc<dyn Middleware>>,
    shutdown: ShutdownHandle,
}

impl App {
    pub fn new(shutdown: ShutdownHandle) -> Self {
        Self { routes: HashMap::new(), middleware: Vec::new(), shutdown }
    }

    /// Appends a middleware. The first one added is the outermost.
    ///
    /// The chain is folded when a route is registered, so only routes
    /// registered after this call are wrapped by it.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Registers `handler` for `method` on `/{version}{pattern}`.
    ///
    /// Named segments use `:name` syntax; `req.param("name")` retrieves them.
    /// An empty `version` registers the pattern unprefixed.
    ///
    /// # Panics
    ///
    /// Panics on an invalid pattern. Use [`App::try_handle`] to get an error instead.
    pub fn handle(self, method: Method, version: &str, pattern: &str, handler: impl Handler) -> Self {
        self.try_handle(method, version, pattern, handler)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`App::handle`], but reports an invalid pattern as
    /// [`Error::InvalidRoute`]: wildcard or brace segments, an empty or
    /// repeated parameter name, or a clash with an existing route.
    pub fn try_handle(
        mut self,
        method: Method,
        version: &str,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<Self, Error> {
        let path = compile(version, pattern)?;
        let handler = self.wrap(handler.into_boxed_handler());
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Route { handler, version: Arc::from(version) })
            .map_err(|e| Error::invalid_route(pattern, e.to_string()))?;
        Ok(self)
    }

    /// Middleware names, outermost first.
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    /// Routes one request and produces one response.
    ///
    /// No route → `404`, no handler runs. Otherwise the chain runs once
    /// against a fresh context; a shutdown error escaping it signals the
    /// coordinator.
    pub async fn dispatch(&self, mut req: Request, remote_addr: Option<SocketAddr>) -> Response {
        let request_id = req
            .header(REQUEST_ID.as_str())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        let mut response = match self.lookup(req.method(), req.path()) {
            None => {
                debug!(method = %req.method(), path = req.path(), "no route");
                Response::error(StatusCode::NOT_FOUND, &ErrorResponse::message("Not Found"))
            }
            Some((route, params)) => {
                req.params = params;
                let ctx = Context::with_version(request_id.clone(), remote_addr, &*route.version);
                let w = ResponseWriter::new(&ctx);

                match route.handler.call(ctx.clone(), w.clone(), req).await {
                    Ok(()) => w.take().unwrap_or_else(|| Response::empty(StatusCode::OK)),
                    Err(err) => {
                        self.escaped(&ctx, &err);
                        w.take().unwrap_or_else(|| {
                            Response::error(StatusCode::INTERNAL_SERVER_ERROR, &ErrorResponse::internal())
                        })
                    }
                }
            }
        };

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID, value);
        }
        response
    }

    /// An error got past every layer. Only shutdown requests are expected here.
    fn escaped(&self, ctx: &Context, err: &BoxError) {
        match ClassifiedError::classify(&**err) {
            ClassifiedError::Shutdown { reason } => {
                warn!(request_id = ctx.request_id(), %reason, "handler requested shutdown");
                self.shutdown.request(reason);
            }
            _ => error!(request_id = ctx.request_id(), error = %err, "error escaped the handler chain"),
        }
    }

    fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        self.middleware.iter().rev().fold(handler, |inner, m| m.wrap(inner))
    }

    /// Literal segments match the raw path, so an encoded `/` stays inside
    /// its parameter; captured values are percent-decoded.
    fn lookup(&self, method: &http::Method, path: &str) -> Option<(Route, HashMap<String, String>)> {
        let method = Method::try_from(method).ok()?;
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), percent_decode_str(v).decode_utf8_lossy().into_owned()))
            .collect();
        Some((matched.value.clone(), params))
    }
}

/// Turns `("v1", "/employee/:id")` into matchit's `/v1/employee/{id}`.
fn compile(version: &str, pattern: &str) -> Result<String, Error> {
    let Some(rest) = pattern.strip_prefix('/') else {
        return Err(Error::invalid_route(pattern, "pattern must start with `/`"));
    };
    if version.contains(['/', ':']) || version.contains(RESERVED) {
        return Err(Error::invalid_route(pattern, format!("invalid version `{version}`")));
    }

    let mut path = String::with_capacity(pattern.len() + version.len() + 1);
    if !version.is_empty() {
        path.push('/');
        path.push_str(version);
    }
    if rest.is_empty() {
        if path.is_empty() {
            path.push('/');
        }
        return Ok(path);
    }

    let mut seen = HashSet::new();
    for segment in rest.split('/') {
        path.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::invalid_route(pattern, "empty parameter name"));
            }
            if name.contains(':') || name.contains(RESERVED) {
                return Err(Error::invalid_route(pattern, format!("invalid parameter name `{name}`")));
            }
            if !seen.insert(name) {
                return Err(Error::invalid_route(pattern, format!("duplicate parameter `{name}`")));
            }
            path.push('{');
            path.push_str(name);
            path.push('}');
        } else if segment.contains(RESERVED) {
            return Err(Error::invalid_route(pattern, "wildcard and brace segments are not supported"));
        } else {
            path.push_str(segment);
        }
    }
    Ok(path)
}
