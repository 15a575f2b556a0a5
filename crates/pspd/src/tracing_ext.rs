//! Tracing helpers for scan operations.
//!
//! Structured logging for the long-running parts of the pipeline. Enable
//! output by installing a subscriber in the host application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{EnvFilter, fmt, prelude::*};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//! // RUST_LOG=pspd=debug for detailed output
//! ```

use std::time::Instant;
use tracing::{Span, debug, info};

/// A performance timer that logs duration on drop.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("pspd_operation", operation = name);
        debug!(target: "pspd::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer with the scan size as context.
    pub fn with_points(name: &'static str, points: usize) -> Self {
        let span = tracing::info_span!("pspd_operation", operation = name, points = points);
        debug!(
            target: "pspd::timing",
            operation = name,
            points = points,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "pspd::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Operation completed"
        );
    }
}

/// Log a completed scan at info level.
pub fn log_scan_summary(visible: usize, degenerate: usize, peak: Option<f64>) {
    info!(
        target: "pspd::scan",
        visible = visible,
        degenerate = degenerate,
        peak = peak.map(|p| format!("{p:.6}")).unwrap_or_else(|| "n/a".into()),
        "Scan completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_scan_summary_does_not_panic() {
        log_scan_summary(100, 0, Some(9.87));
        log_scan_summary(0, 0, None);
    }
}
