//! Time source injected into every component that needs "now"
//!
//! The live engine uses [`SystemClock`]. Backtests drive a [`SteppedClock`] forward one fixed
//! step per simulated tick so every component observes the same simulated instant.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock advanced by a fixed increment between `start` and `end`
#[derive(Debug)]
pub struct SteppedClock {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
    current: Mutex<DateTime<Utc>>,
}

impl SteppedClock {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Self {
        Self {
            start,
            end,
            step,
            current: Mutex::new(start),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Move one step forward and return the new instant
    pub fn advance(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = *current + self.step;
        *current
    }

    /// Whether the clock has reached or passed the end of the replay window
    pub fn is_done(&self) -> bool {
        self.now() >= self.end
    }

    /// Number of steps in the replay window
    pub fn total_steps(&self) -> i64 {
        let step_ms = self.step.num_milliseconds();
        if step_ms <= 0 {
            return 0;
        }
        (self.end - self.start).num_milliseconds() / step_ms
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
