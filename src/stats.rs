//! Message throughput statistics
//!
//! Counts inbound messages over a window that is reset every time the stats are read
//! for reporting. Count and window start live under one lock so they always reset
//! together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Current counting window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsWindow {
    pub message_count: u64,
    pub window_start: DateTime<Utc>,
}

/// Throughput report, also the `process_stats` payload shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessStats {
    pub msgs_per_sec: f64,
    pub topic_count: usize,
}

/// Read-and-reset message counter
#[derive(Debug)]
pub struct StatsAggregator {
    window: Mutex<StatsWindow>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    /// Start a window now
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start a window at `window_start`
    pub fn starting_at(window_start: DateTime<Utc>) -> Self {
        Self {
            window: Mutex::new(StatsWindow {
                message_count: 0,
                window_start,
            }),
        }
    }

    /// Count one inbound message
    pub fn on_message(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.message_count = window.message_count.saturating_add(1);
    }

    /// Copy of the current window without resetting it
    pub fn window(&self) -> StatsWindow {
        *self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report throughput since the last reset and start a new window at `now`
    ///
    /// `topic_count` is taken from the registry by the caller at read time.
    pub fn read_and_reset(&self, now: DateTime<Utc>, topic_count: usize) -> ProcessStats {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        let msgs_per_sec = Self::rate(window.message_count, window.window_start, now);
        window.message_count = 0;
        window.window_start = now;

        ProcessStats {
            msgs_per_sec,
            topic_count,
        }
    }

    /// Messages per second over `[start, now]`, zero for an empty or inverted window (pure function)
    pub fn rate(count: u64, start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed_ms = now.signed_duration_since(start).num_milliseconds();
        if elapsed_ms <= 0 {
            return 0.0;
        }
        count as f64 / (elapsed_ms as f64 / 1000.0)
    }
}
