//! Access log.

use std::sync::Arc;
use std::time::Instant;

use http::Method;

use super::Middleware;
use crate::handler::BoxedHandler;
use crate::logger::Logger;
use crate::request::Request;

/// Emits one `info` line per request: `"<METHOD> <PATH> <elapsed>"`.
///
/// The line is written once the handler below has finished, whatever the
/// outcome: a response, an error result, or a panic unwinding through this
/// layer. The outcome itself is passed up untouched.
#[derive(Clone)]
pub struct AccessLog {
    logger: Arc<dyn Logger>,
}

impl AccessLog {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl Middleware for AccessLog {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let logger = Arc::clone(&self.logger);

        BoxedHandler::new(move |req: Request| {
            let next = next.clone();
            let entry = Entry {
                logger: Arc::clone(&logger),
                method: req.method().clone(),
                path: req.path().to_owned(),
                start: Instant::now(),
            };
            async move {
                let _entry = entry;
                next.call(req).await
            }
        })
    }
}

/// Writes the access line when dropped.
struct Entry {
    logger: Arc<dyn Logger>,
    method: Method,
    path: String,
    start: Instant,
}

impl Drop for Entry {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.logger.info(&format!("{} {} {elapsed:?}", self.method, self.path));
    }
}
