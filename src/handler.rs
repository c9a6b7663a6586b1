//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! Routes, chains and middleware all need to hold handlers of *different*
//! types uniformly, so every handler is erased behind a trait object
//! (`dyn ErasedHandler`) and shared through an `Arc`.
//!
//! ```text
//! async fn users(req: Request) -> Result<Response, Error> { … }   ← user writes this
//!        ↓ chain(users, middleware)
//! users.into_boxed_handler()                                     ← Handler blanket impl
//!        ↓
//! BoxedHandler(Arc::new(FnHandler(users)))                       ← heap-allocated wrapper
//!        ↓  each middleware wraps the previous BoxedHandler
//! handler.call(req)  at request time                             ← one vtable dispatch per layer
//!        ↓
//! Box::pin(async { users(req).await.into_outcome() })            ← BoxFuture
//! ```
//!
//! The runtime cost per layer is one `Arc` clone and one virtual call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoOutcome, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to a handler outcome.
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears inside
/// the public [`BoxedHandler`]. External crates cannot usefully implement it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
///
/// This is what [`chain`](crate::middleware::chain) produces and what
/// [`Middleware::wrap`](crate::middleware::Middleware::wrap) consumes and
/// returns. Cloning is one atomic increment.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl BoxedHandler {
    /// Erases any [`Handler`].
    pub fn new(handler: impl Handler) -> Self {
        handler.into_boxed_handler()
    }

    /// Runs the handler for one request.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid handler.
///
/// You never implement this yourself. It is satisfied by any `async fn`
/// (or closure returning a future) with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoOutcome
/// ```
///
/// and by [`BoxedHandler`] itself, so composed chains can be composed again.
///
/// The trait is **sealed** via the private `Sealed` supertrait.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

impl private::Sealed for BoxedHandler {}

impl Handler for BoxedHandler {
    fn into_boxed_handler(self) -> BoxedHandler {
        self
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler `F` and bridges it to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;

    use super::*;

    fn get(path: &str) -> Request {
        Request::from(http::Request::get(path).body(Bytes::new()).unwrap())
    }

    async fn plain(_req: Request) -> &'static str {
        "hi"
    }

    async fn fallible(_req: Request) -> Result<Response, Error> {
        Err(crate::store::PoolError::Closed.into())
    }

    #[tokio::test]
    async fn async_fns_become_handlers() {
        let res = BoxedHandler::new(plain).call(get("/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"hi");
    }

    #[tokio::test]
    async fn errors_surface_as_err() {
        assert!(BoxedHandler::new(fallible).call(get("/")).await.is_err());
    }

    #[tokio::test]
    async fn boxed_handlers_rebox_to_themselves() {
        let inner = BoxedHandler::new(|_req: Request| async { StatusCode::ACCEPTED });
        let again = BoxedHandler::new(inner.clone());
        assert!(Arc::ptr_eq(&inner.0, &again.0));
        let res = again.call(get("/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
    }
}
