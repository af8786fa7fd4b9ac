//! Logging bootstrap and timing helpers.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_tracing`] once at startup.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_filter` (e.g. `"agentflow=info"`) when `RUST_LOG`
/// is unset or invalid. Returns false if a subscriber was already installed.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.is_ok()
}

/// Wall-clock timer for a named span of work.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in whole milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> u64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("extractor");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "extractor");
        assert!(timer.finish() >= 10);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _ = init_tracing(LogFormat::Compact, "agentflow=debug");
        assert!(!init_tracing(LogFormat::Json, "agentflow=debug"));
    }
}
