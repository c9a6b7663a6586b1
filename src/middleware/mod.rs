//! Middleware layer.
//!
//! A middleware is a decorator: it takes the handler below it and returns a
//! new handler that does something before and/or after delegating. This is
//! the place for cross-cutting concerns: access logging, fault recovery,
//! method filtering, database-session scoping and authorization.
//!
//! # Ordering
//!
//! [`chain`] folds the list right-to-left, so the **first-listed middleware is
//! the outermost wrapper**: it sees the request before every other layer and
//! sees the outcome after every other layer has finished.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! use strata::middleware::{self, Chain};
//! use strata::{Method, MemoryPool, Request, TracingLogger};
//!
//! # async fn index(_req: Request) -> &'static str { "home" }
//! let log = Arc::new(TracingLogger);
//! let pool = Arc::new(MemoryPool::new(8));
//!
//! let handler = Chain::new()
//!     .with(middleware::logging(log.clone()))    // outermost
//!     .with(middleware::recovery(log))
//!     .with(middleware::db_session(pool))
//!     .with(middleware::method([Method::GET]))   // innermost
//!     .then(index);
//! ```
//!
//! Recovery only contains faults raised *below* it. The server brackets every
//! routed handler with the same guard, so a fault in an outer layer still
//! ends as a 500 rather than a dropped connection.

mod auth;
mod logging;
mod method;
pub mod recovery;
mod session;

use std::sync::Arc;

use http::Method;

use crate::auth::AuthStore;
use crate::handler::{BoxedHandler, Handler};
use crate::logger::Logger;
use crate::store::Pool;

pub use auth::{Authorize, DEFAULT_SESSION_COOKIE};
pub use logging::AccessLog;
pub use method::MethodFilter;
pub use recovery::{Recover, guard};
pub use session::DbSession;

/// A transform from handler to handler.
///
/// Implementations are stateless templates: anything a single request needs
/// is created inside the handler that [`wrap`](Middleware::wrap) returns.
/// Any `Fn(BoxedHandler) -> BoxedHandler` closure is a middleware.
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// Applies `middleware` to `handler`, first-listed outermost.
///
/// `chain(h, vec![a, b])` behaves exactly like `a.wrap(b.wrap(h))`. The list
/// is consumed; the returned handler keeps no reference to it.
pub fn chain(handler: impl Handler, middleware: Vec<Box<dyn Middleware>>) -> BoxedHandler {
    middleware
        .into_iter()
        .rev()
        .fold(handler.into_boxed_handler(), |next, layer| layer.wrap(next))
}

/// Builder form of [`chain`]. Build once at startup, then register the
/// result on a [`Router`](crate::Router).
#[derive(Default)]
pub struct Chain {
    middleware: Vec<Box<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer inside every layer added so far.
    pub fn with(mut self, layer: impl Middleware) -> Self {
        self.middleware.push(Box::new(layer));
        self
    }

    /// Collapses the chain around the terminal `handler`.
    pub fn then(self, handler: impl Handler) -> BoxedHandler {
        chain(handler, self.middleware)
    }
}

// ── Factories ─────────────────────────────────────────────────────────────────

/// Lets through only the listed methods; everything else gets `405`.
pub fn method(allowed: impl IntoIterator<Item = Method>) -> MethodFilter {
    MethodFilter::new(allowed)
}

/// Checks out a database session for each request.
pub fn db_session(pool: Arc<dyn Pool>) -> DbSession {
    DbSession::new(pool)
}

/// Requires a bearer header and an authorized session cookie.
pub fn auth(store: Arc<dyn AuthStore>) -> Authorize {
    Authorize::new(store)
}

/// One access-log line per request.
pub fn logging(logger: Arc<dyn Logger>) -> AccessLog {
    AccessLog::new(logger)
}

/// Turns faults raised below this layer into `500`.
pub fn recovery(logger: Arc<dyn Logger>) -> Recover {
    Recover::new(logger)
}
