//! Unified error type.

use std::fmt::Write as _;

use crate::config::ConfigError;
use crate::store::PoolError;

/// Boxed error accepted from application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by strata's fallible operations.
///
/// Expected client-side failures (401, 403, 405, ...) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s. An `Error` returned
/// by a handler is an unexpected fault: the recovery guard logs it and the
/// client only ever sees `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding to a port or accepting a connection failed.
    #[error("i/o failure")]
    Io(#[from] std::io::Error),

    /// A pool session could not be checked out or used.
    #[error("database pool failure")]
    Pool(#[from] PoolError),

    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// Any other failure raised by application code.
    #[error("handler failed")]
    Handler(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary application error.
    pub fn handler(e: impl Into<BoxError>) -> Self {
        Self::Handler(e.into())
    }

    /// Display of this error followed by every `source()` in the chain,
    /// one per line. Used for server-side diagnostics only.
    ///
    /// Each level names only its own failure, so no cause is printed twice.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let _ = write!(out, "\n  caused by: {cause}");
            source = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::handler(io);
        assert_eq!(err.report(), "handler failed\n  caused by: disk gone");
    }

    #[test]
    fn report_prints_each_cause_once() {
        let err: Error = ConfigError::Read {
            path: "strata.toml".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        }
        .into();
        assert_eq!(
            err.report(),
            "invalid configuration\n  caused by: cannot read strata.toml\n  caused by: no such file"
        );

        let err: Error = PoolError::Closed.into();
        assert_eq!(err.report(), "database pool failure\n  caused by: pool is closed");
    }

    #[test]
    fn pool_errors_convert() {
        let err: Error = PoolError::Closed.into();
        assert!(matches!(err, Error::Pool(PoolError::Closed)));
    }
}
