//! Fault containment.
//!
//! [`guard`] polls a handler future inside `catch_unwind`. A panic, or an
//! `Err` outcome, is turned into a multi-line diagnostic for the logger and a
//! bare `500 Internal Server Error` for the client. Nothing from the
//! diagnostic ever reaches the response.
//!
//! # Where the backtrace comes from
//!
//! By the time `catch_unwind` returns, the stack that panicked is gone. So
//! the first guard installs a process-wide panic hook. While any guard is
//! polling on the current thread, the hook records the panic location and a
//! backtrace into a thread-local slot instead of printing. Outside a guard it
//! defers to whichever hook was installed before. A future is always polled
//! on a single thread per `poll` call, so the slot read after the unwind
//! belongs to the panic just caught.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, poll_fn};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures_util::FutureExt;
use http::StatusCode;

use super::Middleware;
use crate::handler::BoxedHandler;
use crate::logger::Logger;
use crate::request::Request;
use crate::response::Response;

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<Snapshot>> = const { RefCell::new(None) };
}

/// Contains every fault raised by the handlers below it.
///
/// Place it near the top of a chain: faults raised in layers listed *before*
/// it are outside its reach.
#[derive(Clone)]
pub struct Recover {
    logger: Arc<dyn Logger>,
}

impl Recover {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl Middleware for Recover {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let logger = Arc::clone(&self.logger);

        BoxedHandler::new(move |req: Request| {
            let next = next.clone();
            let logger = Arc::clone(&logger);
            async move {
                // `call` runs inside the guard too: wrappers may do work before
                // returning their future.
                let res = guard(logger.as_ref(), async move { next.call(req).await }).await;
                Ok::<_, crate::Error>(res)
            }
        })
    }
}

/// Runs `fut` to completion, converting panics and `Err` outcomes into a
/// logged diagnostic plus `500 Internal Server Error`.
///
/// Never panics itself: if the logger panics while reporting, the 500 is
/// still returned.
pub async fn guard<F>(logger: &dyn Logger, fut: F) -> Response
where
    F: Future<Output = Result<Response, crate::Error>> + Send,
{
    install_panic_hook();

    let mut fut = Box::pin(AssertUnwindSafe(fut).catch_unwind());
    let outcome = poll_fn(|cx| {
        let _depth = Depth::enter();
        fut.as_mut().poll(cx)
    })
    .await;

    let diagnostic = match outcome {
        Ok(Ok(res)) => return res,
        Ok(Err(e)) => format!("Error: {}", e.report()),
        Err(payload) => Fault::new(&*payload, LAST_PANIC.with(|s| s.borrow_mut().take()))
            .to_string(),
    };

    report(logger, &diagnostic);
    Response::error(StatusCode::INTERNAL_SERVER_ERROR)
}

fn report(logger: &dyn Logger, diagnostic: &str) {
    let logged = std::panic::catch_unwind(AssertUnwindSafe(|| logger.fatal(diagnostic)));
    if logged.is_err() {
        tracing::error!("logger panicked while reporting a recovered fault");
    }
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// What the hook saw at the moment of the panic.
struct Snapshot {
    location: Option<String>,
    backtrace: Backtrace,
}

/// A recovered panic, formatted for the server log.
struct Fault {
    message: String,
    snapshot: Option<Snapshot>,
}

impl Fault {
    fn new(payload: &(dyn Any + Send), snapshot: Option<Snapshot>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self { message, snapshot }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.message)?;
        match &self.snapshot {
            Some(snap) => {
                if let Some(location) = &snap.location {
                    writeln!(f, "  at {location}")?;
                }
                write!(f, "{}", snap.backtrace)
            }
            None => write!(f, "{}", Backtrace::force_capture()),
        }
    }
}

// ── Panic hook ────────────────────────────────────────────────────────────────

/// Marks the current thread as polling inside a guard.
struct Depth;

impl Depth {
    fn enter() -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        Depth
    }
}

impl Drop for Depth {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let guarded = GUARD_DEPTH.try_with(Cell::get).unwrap_or(0) > 0;
            if !guarded {
                return previous(info);
            }
            let snapshot = Snapshot {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture(),
            };
            let _ = LAST_PANIC.try_with(|slot| *slot.borrow_mut() = Some(snapshot));
        }));
    });
}
