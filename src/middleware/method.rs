//! Method filter.

use std::sync::Arc;

use http::{Method, StatusCode};

use super::Middleware;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

/// Rejects requests whose verb is not in the allowed set with
/// `405 Method Not Allowed`, without calling the handler below.
///
/// Comparison is case-sensitive: `get` is not `GET`.
#[derive(Clone, Debug)]
pub struct MethodFilter {
    allowed: Arc<[Method]>,
}

impl MethodFilter {
    pub fn new(allowed: impl IntoIterator<Item = Method>) -> Self {
        Self { allowed: allowed.into_iter().collect() }
    }

    /// Value for the `allow` header sent with every 405.
    fn allow_header(&self) -> String {
        self.allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Middleware for MethodFilter {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let allowed = Arc::clone(&self.allowed);
        let allow: Arc<str> = self.allow_header().into();

        BoxedHandler::new(move |req: Request| {
            let next = next.clone();
            let allowed = Arc::clone(&allowed);
            let allow = Arc::clone(&allow);
            async move {
                if !allowed.contains(req.method()) {
                    let mut res = Response::error(StatusCode::METHOD_NOT_ALLOWED);
                    res.headers.push(("allow".to_owned(), allow.to_string()));
                    return Ok(res);
                }
                next.call(req).await
            }
        })
    }
}
