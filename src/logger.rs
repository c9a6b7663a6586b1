//! Logger capability handed to middleware, and process-wide tracing setup.
//!
//! Middleware never reach for a global logger. Each factory takes an
//! `Arc<dyn Logger>` at construction time; production code passes a
//! [`TracingLogger`], tests pass a [`MemoryLogger`] and inspect what it saw.

use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// A sink for leveled text lines. Implementations must not panic.
pub trait Logger: Send + Sync + 'static {
    fn info(&self, line: &str);

    /// Highest severity. Used for recovered faults; does not stop the process.
    fn fatal(&self, line: &str);
}

/// Forwards lines to the installed `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, line: &str) {
        tracing::info!(target: "strata::access", "{line}");
    }

    fn fatal(&self, line: &str) {
        tracing::error!(target: "strata::fault", "{line}");
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Info,
    Fatal,
}

/// Keeps every line in memory.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Lines logged at `level`, oldest first.
    pub fn at(&self, level: Level) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line)
            .collect()
    }

    fn push(&self, level: Level, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, line.to_owned()));
    }
}

impl Logger for MemoryLogger {
    fn info(&self, line: &str) {
        self.push(Level::Info, line);
    }

    fn fatal(&self, line: &str) {
        self.push(Level::Fatal, line);
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is
/// harmless: the second subscriber is discarded with a warning.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.format == LogFormat::Json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = installed {
        tracing::warn!("tracing subscriber already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_keeps_levels_apart() {
        let log = MemoryLogger::new();
        let shared: Arc<dyn Logger> = Arc::new(log.clone());
        shared.info("GET / 1ms");
        shared.fatal("boom");
        shared.info("GET /cart 2ms");

        assert_eq!(log.at(Level::Info), vec!["GET / 1ms", "GET /cart 2ms"]);
        assert_eq!(log.at(Level::Fatal), vec!["boom"]);
        assert_eq!(log.lines().len(), 3);
    }
}
