//! Authorization store consulted by the [`Authorize`](crate::middleware::Authorize) gate.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

/// Answers whether a session identifier belongs to an authorized session.
///
/// The pipeline only ever queries the store; granting and revoking sessions
/// is the application's business.
#[async_trait]
pub trait AuthStore: Send + Sync + 'static {
    async fn validate(&self, session_id: &str) -> bool;
}

/// A set of live session identifiers held in memory.
///
/// Clones share the same set, so the login handler can hold one handle and
/// the gate another.
#[derive(Clone, Default)]
pub struct MemoryAuthStore {
    sessions: Arc<RwLock<HashSet<String>>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, session_id: impl Into<String>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.into());
    }

    /// Returns `true` if the session was live.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn validate(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }
}
