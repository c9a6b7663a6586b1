//! # strata
//!
//! A small HTTP pipeline: a terminal handler wrapped in an ordered chain of
//! middleware, each adding one cross-cutting concern.
//!
//! ## The contract
//!
//! Each route gets its own chain, composed once at startup:
//!
//! - **Access log**: one line per request, method, path, elapsed time.
//! - **Recovery**: a panic or an `Err` below it becomes a logged diagnostic
//!   and a bare `500`. The client never sees the diagnostic.
//! - **Database session**: one pooled session per request, released on every
//!   way out of the request, panics included.
//! - **Method filter**: `405` for verbs the route does not serve.
//! - **Authorization**: `401` without a bearer header, `403` without a valid
//!   session cookie.
//!
//! The first middleware listed is the outermost. The server brackets every
//! route with the recovery guard as well, so one bad request never takes a
//! connection, let alone the process, down with it.
//!
//! Collaborators are injected, never global: middleware factories take the
//! [`Pool`], the [`AuthStore`] and the [`Logger`] they need as `Arc`s.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strata::middleware::{self, Chain};
//! use strata::{
//!     Error, MemoryAuthStore, MemoryPool, Method, Request, Response, Router, Server,
//!     TracingLogger,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let log = Arc::new(TracingLogger);
//!     let pool = Arc::new(MemoryPool::new(16));
//!     let sessions = Arc::new(MemoryAuthStore::new());
//!
//!     let users = Chain::new()
//!         .with(middleware::logging(log.clone()))
//!         .with(middleware::recovery(log.clone()))
//!         .with(middleware::db_session(pool.clone()))
//!         .with(middleware::method([Method::GET, Method::POST]))
//!         .with(middleware::auth(sessions))
//!         .then(list_users);
//!
//!     let app = Router::new().route("/users", users);
//!     Server::bind("0.0.0.0:8000").logger(log).serve(app).await
//! }
//!
//! async fn list_users(req: Request) -> Result<Response, Error> {
//!     let Some(db) = req.session() else {
//!         return Err(Error::handler("no database session"));
//!     };
//!     let users = db.find("users", &serde_json::Value::Null).await?;
//!     Ok(Response::json(serde_json::to_vec(&users).map_err(Error::handler)?))
//! }
//! ```

mod auth;
mod config;
mod error;
mod handler;
mod logger;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;
pub mod store;

pub use auth::{AuthStore, MemoryAuthStore};
pub use config::{
    AuthConfig, Config, ConfigError, DatabaseConfig, LogFormat, LoggingConfig, ServerConfig,
};
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use http::{Method, StatusCode};
pub use logger::{Level, Logger, MemoryLogger, TracingLogger, init_tracing};
pub use middleware::{Chain, Middleware, chain};
pub use request::Request;
pub use response::{ContentType, IntoOutcome, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{DEFAULT_MAX_BODY_BYTES, Server};
pub use store::{Lease, MemoryPool, Pool, PoolError, Session};
