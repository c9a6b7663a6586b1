//! Authorization gate.

use std::sync::Arc;

use http::StatusCode;
use http::header::AUTHORIZATION;

use super::Middleware;
use crate::auth::AuthStore;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

/// Cookie that carries the session identifier unless configured otherwise.
pub const DEFAULT_SESSION_COOKIE: &str = "session_id";

/// Two-tier authorization check.
///
/// | Request | Outcome |
/// |---|---|
/// | no `authorization` header, or an empty one | `401 Unauthorized` |
/// | header present, session cookie missing or unknown to the store | `403 Forbidden` |
/// | header present, session cookie valid | handler below runs |
///
/// The bearer token itself is opaque here: only its presence is checked.
/// The cookie is never consulted for a request without a token.
#[derive(Clone)]
pub struct Authorize {
    store: Arc<dyn AuthStore>,
    cookie: Arc<str>,
}

impl Authorize {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store, cookie: DEFAULT_SESSION_COOKIE.into() }
    }

    /// Reads the session identifier from `name` instead of [`DEFAULT_SESSION_COOKIE`].
    pub fn cookie_name(mut self, name: &str) -> Self {
        self.cookie = name.into();
        self
    }
}

impl Middleware for Authorize {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let store = Arc::clone(&self.store);
        let cookie = Arc::clone(&self.cookie);

        BoxedHandler::new(move |req: Request| {
            let next = next.clone();
            let store = Arc::clone(&store);
            let cookie = Arc::clone(&cookie);
            async move {
                if !has_token(&req) {
                    return Ok(Response::error(StatusCode::UNAUTHORIZED));
                }
                let authorized = match req.cookie(&cookie) {
                    Some(id) if !id.is_empty() => store.validate(id).await,
                    _ => false,
                };
                if !authorized {
                    return Ok(Response::error(StatusCode::FORBIDDEN));
                }
                next.call(req).await
            }
        })
    }
}

fn has_token(req: &Request) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .is_some_and(|v| !v.as_bytes().trim_ascii().is_empty())
}
