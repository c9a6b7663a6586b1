//! Per-request database session scope.

use std::sync::Arc;

use super::Middleware;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::store::Pool;

/// Checks out one session from the pool per request and attaches it to the
/// request, where handlers below reach it through [`Request::session`].
///
/// The lease travels inside the request, so it is released when the request
/// is dropped: after the handler below returns, rejects early, fails, or
/// unwinds. A request that already holds a lease is passed through without a
/// second checkout. A failed checkout becomes an [`Error::Pool`] for the
/// recovery guard to answer.
///
/// [`Error::Pool`]: crate::Error::Pool
#[derive(Clone)]
pub struct DbSession {
    pool: Arc<dyn Pool>,
}

impl DbSession {
    pub fn new(pool: Arc<dyn Pool>) -> Self {
        Self { pool }
    }
}

impl Middleware for DbSession {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let pool = Arc::clone(&self.pool);

        BoxedHandler::new(move |mut req: Request| {
            let next = next.clone();
            let pool = Arc::clone(&pool);
            async move {
                if !req.has_session() {
                    req.attach_session(pool.checkout().await?);
                }
                next.call(req).await
            }
        })
    }
}
