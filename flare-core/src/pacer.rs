//! Frame pacing
//!
//! Holds the capture loop at a target period by sleeping whatever is left of
//! the interval after grabbing, converting and handing off a frame. Frames
//! that take longer than the interval are not compensated; the next one
//! starts immediately.

use std::time::{Duration, Instant};
use tracing::trace;

/// Time left to sleep this iteration
///
/// `max(0, target - elapsed)`.
pub fn compute_sleep(target: Duration, elapsed: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

/// Per-loop pacer
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    interval: Option<Duration>,
}

impl Pacer {
    /// Pacer for a refresh rate in frames per second (0 = uncapped)
    pub fn new(refresh_rate: u32) -> Self {
        Self {
            interval: (refresh_rate > 0).then(|| Duration::from_secs(1) / refresh_rate),
        }
    }

    /// A pacer that never sleeps
    pub fn uncapped() -> Self {
        Self { interval: None }
    }

    /// Target interval, `None` when uncapped
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Sleep needed after `elapsed` of work; always zero when uncapped
    pub fn sleep_for(&self, elapsed: Duration) -> Duration {
        match self.interval {
            Some(target) => compute_sleep(target, elapsed),
            None => Duration::ZERO,
        }
    }

    /// Sleep out the rest of the iteration that began at `iteration_start`
    pub fn pace(&self, iteration_start: Instant) -> Duration {
        let sleep = self.sleep_for(iteration_start.elapsed());
        if !sleep.is_zero() {
            trace!("Pacing: sleeping {:?}", sleep);
            std::thread::sleep(sleep);
        }
        sleep
    }
}
