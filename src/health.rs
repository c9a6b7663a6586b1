//! Built-in health-check handlers.
//!
//! | Probe | Suggested path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can a session be checked out? Failure → pulled from the load-balancer. |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::{MemoryPool, Router, health};
//!
//! let pool = Arc::new(MemoryPool::new(8));
//! let app = Router::new()
//!     .route("/healthz", health::liveness)
//!     .route("/readyz",  health::readiness(pool));
//! ```

use std::sync::Arc;

use http::StatusCode;
use tracing::warn;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;
use crate::store::Pool;

/// Liveness check handler.
///
/// Always returns `200 OK` with body `"ok"`. If the process can respond to
/// HTTP at all, it is alive.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness check handler.
///
/// Checks out a session and hands it straight back. `200 ready` on success,
/// `503 Service Unavailable` if the pool is closed or stays exhausted past its
/// checkout timeout.
pub fn readiness(pool: Arc<dyn Pool>) -> BoxedHandler {
    BoxedHandler::new(move |_req: Request| {
        let pool = Arc::clone(&pool);
        async move {
            match pool.checkout().await {
                Ok(_lease) => Response::text("ready"),
                Err(e) => {
                    warn!("readiness check failed: {e}");
                    Response::error(StatusCode::SERVICE_UNAVAILABLE)
                }
            }
        }
    })
}
