use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

/// A named, completed timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub operation: String,
    pub elapsed_ms: u64,
}

/// Wall-clock timer for named operations.
///
/// Owned by whoever drives a cycle and passed down by `&mut`; every `stop`
/// returns the elapsed time and records it as a [`Lap`].
#[derive(Debug, Default)]
pub struct StopWatch {
    started: Option<Instant>,
    laps: Vec<Lap>,
}

impl StopWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stop the timer, log and record the elapsed time for `operation`.
    ///
    /// Returns `None` if the timer was never started.
    pub fn stop(&mut self, operation: &str) -> Option<Duration> {
        let elapsed = self.started.take()?.elapsed();
        info!(
            operation = %operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "time elapsed"
        );
        self.laps.push(Lap {
            operation: operation.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
        Some(elapsed)
    }

    pub fn laps(&self) -> &[Lap] {
        &self.laps
    }
}
