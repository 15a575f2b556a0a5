//! Progress reporting and cancellation for the per-point scan.
//!
//! The scan cost grows with the visible-point count times the per-point
//! query, fit, and integration cost, so long runs need a heartbeat and a
//! way out. A callback injected at engine construction receives throttled
//! [`Progress`] snapshots and can request cancellation by returning
//! `false`; the tracker itself is atomic so the parallel scan updates it
//! without locks.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Completed scan points.
    pub current: u64,

    /// Total scan points.
    pub total: u64,

    /// Human-readable message describing the current stage.
    pub message: String,

    /// Elapsed time since the scan started.
    pub elapsed: Duration,
}

impl Progress {
    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }
}

/// Callback for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// A thread-safe progress tracker for one scan.
///
/// Atomic counters allow every worker thread to update progress without
/// locks; only callback throttling takes a mutex, and only on the throttle
/// interval.
#[derive(Debug)]
pub struct ProgressTracker {
    current: AtomicU64,
    total: u64,
    cancelled: AtomicBool,
    start_time: Instant,
    last_callback: Mutex<Instant>,
    callback_interval: Duration,
}

impl ProgressTracker {
    /// Create a tracker for `total` scan points.
    ///
    /// The first `report` fires immediately; later reports are throttled.
    pub fn new(total: u64) -> Self {
        let interval = Duration::from_millis(100);
        let now = Instant::now();
        Self {
            current: AtomicU64::new(0),
            total,
            cancelled: AtomicBool::new(false),
            start_time: now,
            last_callback: Mutex::new(now.checked_sub(interval).unwrap_or(now)),
            callback_interval: interval,
        }
    }

    /// Record one completed scan point.
    #[inline]
    pub fn increment(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed count.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Total count.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Check if cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Elapsed time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Build a progress snapshot for callbacks.
    pub fn snapshot(&self, message: impl Into<String>) -> Progress {
        Progress {
            current: self.current(),
            total: self.total,
            message: message.into(),
            elapsed: self.elapsed(),
        }
    }

    /// Invoke the callback if the throttle interval has passed.
    ///
    /// A `false` return from the callback flips the cancellation flag.
    pub fn report(&self, callback: &ProgressCallback, message: &str) {
        let now = Instant::now();
        {
            let mut last = match self.last_callback.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if now.duration_since(*last) < self.callback_interval {
                return;
            }
            *last = now;
        }

        if !callback(&self.snapshot(message)) {
            self.cancel();
        }
    }
}
