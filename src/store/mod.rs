//! Document-store boundary: pools, sessions and request leases.
//!
//! The pipeline only needs two things from a database driver: a cheap,
//! concurrency-safe way to check out a session, and a way to hand it back.
//! [`Pool`] and [`Session`] describe exactly that, plus the handful of
//! document operations the handlers use.
//!
//! A checked-out session is always wrapped in a [`Lease`]. The lease releases
//! its session when dropped, so a session cannot outlive the request that
//! owns it, whether that request returns normally, is rejected early, or
//! unwinds from a panic.

mod memory;

use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryPool;

/// Failures raised by a pool or one of its sessions.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every session stayed busy for the whole checkout timeout.
    #[error("no session became available within {0:?}")]
    Exhausted(Duration),

    /// The pool was shut down.
    #[error("pool is closed")]
    Closed,

    /// The session was used after being released.
    #[error("session already released")]
    Released,

    #[error("invalid document: {0}")]
    Document(String),
}

/// A shared connection pool. Implementations must allow many concurrent
/// checkouts without cross-request interference.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// Checks out an independent session. May wait while the pool is exhausted.
    async fn checkout(&self) -> Result<Lease, PoolError>;
}

/// One session bound to a backing connection.
///
/// Filters are JSON objects matched by top-level field equality; `null` or
/// `{}` matches every document.
#[async_trait]
pub trait Session: Send + Sync {
    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, PoolError>;

    async fn insert(&self, collection: &str, document: Value) -> Result<(), PoolError>;

    /// Merges the fields of `changes` into every matching document.
    /// Returns the number of documents touched.
    async fn update(&self, collection: &str, filter: &Value, changes: &Value)
        -> Result<usize, PoolError>;

    /// Returns the number of documents removed.
    async fn remove(&self, collection: &str, filter: &Value) -> Result<usize, PoolError>;

    /// Hands the backing connection back to the pool.
    ///
    /// Called exactly once, by [`Lease`]'s `Drop`.
    fn release(&mut self);
}

/// A request-exclusive handle to a checked-out [`Session`].
///
/// Dereferences to the session. Dropping the lease releases the session,
/// exactly once.
pub struct Lease {
    session: Box<dyn Session>,
}

impl Lease {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }
}

impl Deref for Lease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.session.release();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Lease")
    }
}
