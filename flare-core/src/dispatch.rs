//! Frame delivery
//!
//! A single long-lived worker thread runs the consumer callback. The capture
//! loop owns exactly one [`FrameBuffer`]; submitting moves it to the worker
//! and the worker moves it back once the callback returns. The loop cannot
//! write into a buffer the consumer is reading because it does not have it,
//! and [`DeliveryDispatcher::acquire`] blocks until it comes back.
//!
//! [`DeliveryGate`] decides whether callbacks still fire. Closing it waits for
//! a callback already running on another thread, so once `close` returns no
//! new frame or error callback starts.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::ReentrantMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{CaptureError, Result};
use crate::metrics::CaptureMetrics;
use crate::types::FrameBuffer;

/// Consumer callback: frame bytes and their length
pub type FrameHandler = Box<dyn FnMut(&[u8], u64) + Send + 'static>;

/// Error callback: message and numeric code
pub type ErrorHandler = Arc<dyn Fn(&str, i32) + Send + Sync + 'static>;

/// Open/closed switch for consumer-visible callbacks
#[derive(Default)]
pub struct DeliveryGate {
    accepting: AtomicBool,
    delivering: ReentrantMutex<()>,
}

impl std::fmt::Debug for DeliveryGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryGate")
            .field("accepting", &self.is_open())
            .finish()
    }
}

impl DeliveryGate {
    /// Create a closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Let callbacks fire
    pub fn open(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Stop callbacks and wait for one in progress on another thread
    ///
    /// Calling this from inside a callback does not deadlock; the lock is
    /// reentrant for the thread running the callback.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        drop(self.delivering.lock());
    }

    /// Whether callbacks currently fire
    pub fn is_open(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run `f` if the gate is open; returns whether it ran
    pub fn deliver(&self, f: impl FnOnce()) -> bool {
        let _guard = self.delivering.lock();
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        f();
        true
    }
}

/// Hands frames from the capture loop to the consumer worker
pub struct DeliveryDispatcher {
    submit_tx: Option<Sender<FrameBuffer>>,
    return_rx: Receiver<FrameBuffer>,
    worker: Option<JoinHandle<FrameHandler>>,
    /// The buffer, while the loop holds it
    spare: Option<FrameBuffer>,
}

impl std::fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl DeliveryDispatcher {
    /// Start the consumer worker
    ///
    /// `buffer` is the one frame buffer that will circulate between the loop
    /// and the worker for the whole capture.
    pub fn spawn(
        mut handler: FrameHandler,
        buffer: FrameBuffer,
        gate: Arc<DeliveryGate>,
        metrics: Arc<CaptureMetrics>,
    ) -> Result<Self> {
        let (submit_tx, submit_rx) = bounded::<FrameBuffer>(1);
        let (return_tx, return_rx) = bounded::<FrameBuffer>(1);

        let worker = std::thread::Builder::new()
            .name("flare-delivery".to_string())
            .spawn(move || {
                debug!("Delivery worker started");
                for frame in submit_rx {
                    let started = Instant::now();
                    let delivered = gate.deliver(|| handler(frame.as_slice(), frame.len() as u64));
                    if delivered {
                        metrics.record_delivery(frame.len(), started.elapsed());
                        trace!("Delivered frame {} ({} bytes)", frame.sequence, frame.len());
                    } else {
                        trace!("Discarded frame {} after stop", frame.sequence);
                    }
                    if return_tx.send(frame).is_err() {
                        break;
                    }
                }
                debug!("Delivery worker exiting");
                handler
            })
            .map_err(|e| CaptureError::resource(format!("Failed to spawn delivery worker: {}", e)))?;

        Ok(Self {
            submit_tx: Some(submit_tx),
            return_rx,
            worker: Some(worker),
            spare: Some(buffer),
        })
    }

    /// Number of frames handed to the worker and not yet returned (0 or 1)
    pub fn in_flight(&self) -> usize {
        usize::from(self.spare.is_none())
    }

    /// Take the frame buffer, waiting for the previous delivery to finish
    pub fn acquire(&mut self) -> Result<FrameBuffer> {
        if let Some(buffer) = self.spare.take() {
            return Ok(buffer);
        }
        self.return_rx
            .recv()
            .map_err(|_| CaptureError::delivery("Delivery worker stopped unexpectedly"))
    }

    /// Hand a filled buffer to the consumer worker
    pub fn submit(&mut self, frame: FrameBuffer) -> Result<()> {
        let tx = self
            .submit_tx
            .as_ref()
            .ok_or_else(|| CaptureError::delivery("Dispatcher is shut down"))?;
        tx.send(frame)
            .map_err(|_| CaptureError::delivery("Delivery worker stopped unexpectedly"))
    }

    /// Give back a buffer that was acquired but not submitted
    pub fn release(&mut self, frame: FrameBuffer) {
        self.spare = Some(frame);
    }

    /// Drain the worker, join it and return the consumer callback
    pub fn shutdown(mut self) -> Result<FrameHandler> {
        self.submit_tx.take();
        let worker = self
            .worker
            .take()
            .ok_or_else(|| CaptureError::delivery("Delivery worker already joined"))?;
        worker
            .join()
            .map_err(|_| CaptureError::delivery("Frame callback panicked"))
    }
}

impl Drop for DeliveryDispatcher {
    fn drop(&mut self) {
        self.submit_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Delivery worker panicked");
            }
        }
    }
}
