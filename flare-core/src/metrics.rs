//! Capture loop metrics
//!
//! Provides:
//! - Stage timing (grab, produce, gate wait, consumer callback)
//! - Rolling averages for latency statistics
//! - Delivered and skipped frame counts
//! - A once-per-second fps log line

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// How often the fps line is logged
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Statistics snapshot
#[derive(Debug, Clone)]
pub struct CaptureStats {
    /// Average grab time in milliseconds
    pub grab_ms: f64,
    /// Average convert/encode time in milliseconds
    pub produce_ms: f64,
    /// Average time spent waiting for the previous delivery
    pub gate_wait_ms: f64,
    /// Average consumer callback time in milliseconds
    pub delivery_ms: f64,
    /// Frames per second from the average loop period
    pub fps: f64,
    /// Average loop period in milliseconds
    pub period_ms: f64,
    /// Frames handed to the consumer
    pub frames_delivered: u64,
    /// Iterations that produced no frame (recreated session, encoder latency)
    pub frames_skipped: u64,
    /// Bytes handed to the consumer
    pub bytes_delivered: u64,
}

impl CaptureStats {
    /// Format stats as a single line
    pub fn format_line(&self) -> String {
        format!(
            "{:.1}fps | grab {:.1}ms | produce {:.1}ms | wait {:.1}ms | deliver {:.1}ms | frames {} (skipped {})",
            self.fps,
            self.grab_ms,
            self.produce_ms,
            self.gate_wait_ms,
            self.delivery_ms,
            self.frames_delivered,
            self.frames_skipped
        )
    }
}

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Window for the periodic fps log line
#[derive(Debug)]
struct FpsWindow {
    started: Instant,
    frames: u64,
}

/// Metrics collector shared between the capture loop and the consumer worker
#[derive(Debug)]
pub struct CaptureMetrics {
    grab: RwLock<RollingAverage>,
    produce: RwLock<RollingAverage>,
    gate_wait: RwLock<RollingAverage>,
    delivery: RwLock<RollingAverage>,
    periods: RwLock<RollingAverage>,
    last_delivery: Mutex<Option<Instant>>,
    fps_window: Mutex<FpsWindow>,
    frames_delivered: AtomicU64,
    frames_skipped: AtomicU64,
    bytes_delivered: AtomicU64,
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            grab: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            produce: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            gate_wait: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            delivery: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            periods: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            last_delivery: Mutex::new(None),
            fps_window: Mutex::new(FpsWindow {
                started: Instant::now(),
                frames: 0,
            }),
            frames_delivered: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
        }
    }

    /// Record grab stage timing
    pub fn record_grab(&self, duration: Duration) {
        self.grab.write().add(duration);
    }

    /// Record conversion or encode timing
    pub fn record_produce(&self, duration: Duration) {
        self.produce.write().add(duration);
    }

    /// Record time spent waiting for the previous delivery to finish
    pub fn record_gate_wait(&self, duration: Duration) {
        self.gate_wait.write().add(duration);
    }

    /// Record a completed consumer callback
    pub fn record_delivery(&self, bytes: usize, duration: Duration) {
        self.delivery.write().add(duration);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);

        let now = Instant::now();
        if let Some(previous) = self.last_delivery.lock().replace(now) {
            self.periods.write().add(now.duration_since(previous));
        }

        let mut window = self.fps_window.lock();
        window.frames += 1;
        let elapsed = now.duration_since(window.started);
        if elapsed >= FPS_LOG_INTERVAL {
            debug!(
                "{:.1} fps ({} frames in {:?})",
                window.frames as f64 / elapsed.as_secs_f64(),
                window.frames,
                elapsed
            );
            window.started = now;
            window.frames = 0;
        }
    }

    /// Record an iteration that produced nothing to deliver
    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics
    pub fn stats(&self) -> CaptureStats {
        let period = self.periods.read().average();
        let fps = if period.as_secs_f64() > 0.0 {
            1.0 / period.as_secs_f64()
        } else {
            0.0
        };

        CaptureStats {
            grab_ms: self.grab.read().average_ms(),
            produce_ms: self.produce.read().average_ms(),
            gate_wait_ms: self.gate_wait.read().average_ms(),
            delivery_ms: self.delivery.read().average_ms(),
            fps,
            period_ms: period.as_secs_f64() * 1000.0,
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
        }
    }

    /// Get total frames delivered
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.grab.write().clear();
        self.produce.write().clear();
        self.gate_wait.write().clear();
        self.delivery.write().clear();
        self.periods.write().clear();
        *self.last_delivery.lock() = None;
        *self.fps_window.lock() = FpsWindow {
            started: Instant::now(),
            frames: 0,
        };
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.bytes_delivered.store(0, Ordering::Relaxed);
    }
}
