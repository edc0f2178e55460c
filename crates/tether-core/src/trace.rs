//! Named timing and counter sink.
//!
//! Components report durations and counts by name (for example
//! `connection-drop-background-error` or `retries-allowed`). The default driver
//! keeps everything in memory and logs at trace level, which is what the
//! tests inspect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

/// Receives named timings and counters.
pub trait TracerDriver: Send + Sync {
    /// Record how long `name` took.
    fn add_time(&self, name: &str, elapsed: Duration);

    /// Add `increment` to counter `name`.
    fn add_count(&self, name: &str, increment: i64);
}

/// In-memory tracer driver.
#[derive(Debug, Default)]
pub struct DefaultTracerDriver {
    counters: Mutex<HashMap<String, i64>>,
    timings: Mutex<HashMap<String, (u64, Duration)>>,
}

impl DefaultTracerDriver {
    /// Create an empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of counter `name` (0 if never incremented).
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Number of timings recorded for `name`.
    pub fn time_samples(&self, name: &str) -> u64 {
        self.timings.lock().get(name).map(|(samples, _)| *samples).unwrap_or(0)
    }
}

impl TracerDriver for DefaultTracerDriver {
    fn add_time(&self, name: &str, elapsed: Duration) {
        trace!(trace = name, elapsed_us = elapsed.as_micros() as u64, "trace time");
        let mut timings = self.timings.lock();
        let entry = timings.entry(name.to_string()).or_insert((0, Duration::ZERO));
        entry.0 = entry.0.saturating_add(1);
        entry.1 = entry.1.saturating_add(elapsed);
    }

    fn add_count(&self, name: &str, increment: i64) {
        trace!(trace = name, increment, "trace count");
        let mut counters = self.counters.lock();
        let value = counters.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(increment);
    }
}

impl<T: TracerDriver + ?Sized> TracerDriver for Arc<T> {
    fn add_time(&self, name: &str, elapsed: Duration) {
        (**self).add_time(name, elapsed)
    }

    fn add_count(&self, name: &str, increment: i64) {
        (**self).add_count(name, increment)
    }
}

/// Times a region and reports it to the driver when committed or dropped.
pub struct TimeTrace {
    name: &'static str,
    driver: Arc<dyn TracerDriver>,
    start: Instant,
    committed: bool,
}

impl TimeTrace {
    /// Start timing `name`.
    pub fn new(name: &'static str, driver: Arc<dyn TracerDriver>) -> Self {
        Self {
            name,
            driver,
            start: Instant::now(),
            committed: false,
        }
    }

    /// Report the elapsed time now.
    pub fn commit(mut self) {
        self.report();
    }

    fn report(&mut self) {
        if !self.committed {
            self.committed = true;
            self.driver.add_time(self.name, self.start.elapsed());
        }
    }
}

impl Drop for TimeTrace {
    fn drop(&mut self) {
        self.report();
    }
}
