//! Middleware layer.
//!
//! A middleware turns one handler into another. The [`App`](crate::App)
//! keeps an ordered list of them and folds it around every handler at
//! registration time: the first layer added is the outermost, so it runs
//! first on the way in and last on the way out.
//!
//! ```text
//! App::new(shutdown).layer(AccessLog::new()).layer(ErrorTranslation::new())
//!
//! request  → AccessLog → ErrorTranslation → handler
//! response ← AccessLog ← ErrorTranslation ←───┘
//! ```
//!
//! Layers share nothing but the request-scoped [`Context`](crate::Context).
//!
//! Built-in middleware:
//! - [`AccessLog`]: method, path, status and latency per request
//! - [`ErrorTranslation`]: renders handler errors as JSON, re-raises shutdown requests

mod access_log;
mod errors;

pub use access_log::AccessLog;
pub use errors::ErrorTranslation;

use crate::handler::BoxedHandler;

/// A `Handler -> Handler` transform.
///
/// Implementations may capture dependencies at construction time but must
/// not depend on which handler they wrap.
pub trait Middleware: Send + Sync + 'static {
    /// Name used when listing a chain, e.g. in [`App::middleware_names`](crate::App::middleware_names).
    fn name(&self) -> &'static str;

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}
