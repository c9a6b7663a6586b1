//! Path router.
//!
//! One radix tree keyed by path. O(path-length) lookup. Method handling is
//! not the router's job: put a [`MethodFilter`](crate::middleware::MethodFilter)
//! in the route's chain.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each [`Router::route`] call returns `self` so registrations chain naturally.
pub struct Router {
    routes: MatchitRouter<BoxedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: MatchitRouter::new() }
    }

    /// Registers a (usually composed) handler for `path`. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or already registered. Routes are fixed
    /// at startup, so this surfaces before the first request.
    ///
    /// ```rust,no_run
    /// # use strata::{Request, Router};
    /// # async fn index(_: Request) -> &'static str { "" }
    /// # async fn get_user(_: Request) -> &'static str { "" }
    /// Router::new()
    ///     .route("/",           index)
    ///     .route("/users/{id}", get_user);
    /// ```
    pub fn route(mut self, path: &str, handler: impl Handler) -> Self {
        self.routes
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = self.routes.at(path).ok()?;
        let handler = matched.value.clone();
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
