//! Engine configuration and time sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Limits and failure policy of the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum generation of a derived event.
    pub max_cascade_depth: u32,

    /// Maximum number of events processed in one dispatch.
    pub max_events_per_dispatch: usize,

    /// When true, a failing callback only loses its own cell and is listed
    /// in the dispatch report; when false it aborts the dispatch.
    pub isolate_callback_failures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 64,
            max_events_per_dispatch: 10_000,
            isolate_callback_failures: true,
        }
    }
}

impl EngineConfig {
    /// Tight limits, and any callback failure aborts the dispatch.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_cascade_depth: 16,
            max_events_per_dispatch: 1_000,
            isolate_callback_failures: false,
        }
    }

    /// Generous limits with isolated callback failures.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_cascade_depth: 1_024,
            max_events_per_dispatch: 1_000_000,
            isolate_callback_failures: true,
        }
    }

    /// Builder method to set the maximum cascade depth.
    #[must_use]
    pub fn with_max_cascade_depth(mut self, depth: u32) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Builder method to set the per-dispatch event limit.
    #[must_use]
    pub fn with_max_events_per_dispatch(mut self, limit: usize) -> Self {
        self.max_events_per_dispatch = limit;
        self
    }

    /// Builder method to set the callback failure policy.
    #[must_use]
    pub fn with_isolate_callback_failures(mut self, isolate: bool) -> Self {
        self.isolate_callback_failures = isolate;
        self
    }
}

/// Source of the current time, in milliseconds since the Unix epoch.
pub trait Clock {
    /// The current time.
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Sets the time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the time forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
