//! Resettable monotonic clock.
//!
//! Both watchdog inputs (time since the last status datagram, time since the
//! last TCP message) are measured against this clock and reset whenever the
//! respective event fires.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Elapsed-time counter over a monotonic source.
#[derive(Debug)]
pub struct Clock {
    origin: Mutex<Instant>,
}

impl Clock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Mutex::new(Instant::now()),
        }
    }

    /// Move the origin to now.
    pub fn reset(&self) {
        *self.origin.lock() = Instant::now();
    }

    /// Time elapsed since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.origin.lock().elapsed()
    }

    /// Time elapsed since the last reset, in seconds.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
