//! Monotonic clock sources
//!
//! The reactor resolves tick numbers from a clock rather than trusting the
//! wake signal, so any missed ticks show up as skew.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Nanosecond-resolution monotonic clock
pub trait Clock: Send + Sync + 'static {
    /// Nanoseconds since an arbitrary fixed origin
    fn now(&self) -> i64;
}

/// Clock backed by `Instant`, anchored at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Manually advanced clock for deterministic tests and simulations
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock reading zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as i64, Ordering::AcqRel);
    }

    /// Set the clock to an absolute reading
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }
}
