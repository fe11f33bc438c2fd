//! Video capture session
//!
//! Composes the catalog, a backend, the pacer and the delivery dispatcher
//! into the lifecycle `configure -> load -> start_capture -> stop_capture`.
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌───────────┐   ┌────────────────┐
//! │ Catalog │──▶│ Backend grab │──▶│ gate wait │──▶│ produce/submit │──▶ worker ──▶ on_frame
//! └─────────┘   └──────────────┘   └───────────┘   └────────────────┘
//! ```
//!
//! `start_capture` runs the loop on the calling thread and blocks until it
//! ends. `stop_capture` may be called from any thread (or through a
//! [`StopHandle`]); it only signals, and the loop winds down on its own.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{self, CaptureBackend, Grab, Produced};
use crate::catalog::SourceCatalog;
use crate::config::{BackendKind, CaptureConfig};
use crate::dispatch::{DeliveryDispatcher, DeliveryGate, ErrorHandler, FrameHandler};
use crate::error::{CaptureError, Result};
use crate::metrics::{CaptureMetrics, CaptureStats};
use crate::pacer::Pacer;
use crate::types::{CaptureSource, FrameBuffer};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing loaded yet
    Uninitialized,
    /// Backend loaded for the selected source
    Loaded,
    /// Capture loop running
    Capturing,
    /// Capture stopped; `load` again before restarting
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Loaded => write!(f, "loaded"),
            SessionState::Capturing => write!(f, "capturing"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// State shared with stop handles and the capture loop
#[derive(Debug)]
struct SessionControl {
    state: Mutex<SessionState>,
    running: AtomicBool,
    loop_active: AtomicBool,
    /// Stop requested while loaded, before the loop started
    stop_pending: AtomicBool,
    gate: Arc<DeliveryGate>,
    metrics: Arc<CaptureMetrics>,
}

impl SessionControl {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Session state: {} -> {}", *current, state);
            *current = state;
        }
    }

    fn request_stop(&self) {
        {
            let mut state = self.state.lock();
            self.running.store(false, Ordering::SeqCst);
            match *state {
                SessionState::Capturing => {
                    debug!("Session state: {} -> {}", *state, SessionState::Stopped);
                    *state = SessionState::Stopped;
                    info!("Capture stop requested");
                }
                SessionState::Loaded => {
                    self.stop_pending.store(true, Ordering::SeqCst);
                    debug!("Stop requested before capture started");
                }
                _ => {}
            }
        }
        self.gate.close();
    }

    /// Move `Loaded` to `Capturing` unless a stop got there first
    ///
    /// Runs under the state lock so a concurrent stop either lands before
    /// (and cancels the capture) or after (and ends the loop).
    fn begin_capture(&self) -> bool {
        let mut state = self.state.lock();
        if self.stop_pending.swap(false, Ordering::SeqCst) {
            debug!("Session state: {} -> {}", *state, SessionState::Stopped);
            *state = SessionState::Stopped;
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        self.gate.open();
        debug!("Session state: {} -> {}", *state, SessionState::Capturing);
        *state = SessionState::Capturing;
        true
    }
}

/// Cloneable handle that stops a running capture
#[derive(Debug, Clone)]
pub struct StopHandle {
    control: Arc<SessionControl>,
}

impl StopHandle {
    /// Signal the capture loop to stop
    ///
    /// Once this returns no further frame or error callbacks start.
    pub fn stop(&self) {
        self.control.request_stop();
    }

    /// Whether the capture loop is still winding down or running
    pub fn is_active(&self) -> bool {
        self.control.loop_active.load(Ordering::SeqCst)
    }
}

/// What the backend was last loaded with
#[derive(Debug, Clone, PartialEq)]
struct LoadedTarget {
    source: CaptureSource,
    config: CaptureConfig,
}

/// Mutable session data, taken apart while the loop runs
struct Inner {
    config: CaptureConfig,
    catalog: SourceCatalog,
    backend: Option<Box<dyn CaptureBackend>>,
    backend_kind: Option<BackendKind>,
    /// Injected backends are never replaced on reconfiguration
    pinned: bool,
    /// Backend selection changed after load; replaced by the next load
    backend_stale: bool,
    loaded: Option<LoadedTarget>,
    frame_handler: Option<FrameHandler>,
    error_handler: Option<ErrorHandler>,
    handlers_frozen: bool,
}

impl Inner {
    fn ensure_backend(&mut self) -> Result<&mut Box<dyn CaptureBackend>> {
        if self.backend.is_none() {
            let backend = backend::create_backend(&self.config)?;
            self.backend_kind = Some(backend.kind());
            self.backend = Some(backend);
        }
        self.backend
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("No capture backend"))
    }
}

/// A video capture session
///
/// All methods take `&self`, so a session can be shared across threads
/// (typically in an `Arc`) with one thread blocked in
/// [`start_capture`](Self::start_capture).
pub struct CaptureSession {
    inner: Mutex<Inner>,
    control: Arc<SessionControl>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    /// Create a session with the default configuration
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                config: CaptureConfig::default(),
                catalog: SourceCatalog::new(),
                backend: None,
                backend_kind: None,
                pinned: false,
                backend_stale: false,
                loaded: None,
                frame_handler: None,
                error_handler: None,
                handlers_frozen: false,
            }),
            control: Arc::new(SessionControl {
                state: Mutex::new(SessionState::Uninitialized),
                running: AtomicBool::new(false),
                loop_active: AtomicBool::new(false),
                stop_pending: AtomicBool::new(false),
                gate: Arc::new(DeliveryGate::new()),
                metrics: Arc::new(CaptureMetrics::new()),
            }),
        }
    }

    /// Create a session around a specific backend
    pub fn with_backend(backend: Box<dyn CaptureBackend>) -> Self {
        let session = Self::new();
        {
            let mut inner = session.inner.lock();
            inner.backend_kind = Some(backend.kind());
            inner.backend = Some(backend);
            inner.pinned = true;
        }
        session
    }

    /// Run `f` on the inner data and forward any error to the error callback
    ///
    /// The callback runs after the lock is released so it may call back into
    /// the session.
    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let (result, handler) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner);
            let handler = if result.is_err() {
                inner.error_handler.clone()
            } else {
                None
            };
            (result, handler)
        };
        if let (Err(e), Some(handler)) = (&result, handler) {
            handler(&e.to_string(), e.code());
        }
        result
    }

    fn reject_while_capturing(&self, what: &str) -> Result<()> {
        if self.control.state() == SessionState::Capturing
            || self.control.loop_active.load(Ordering::SeqCst)
        {
            return Err(CaptureError::config(format!("Cannot {} while capturing", what)));
        }
        Ok(())
    }

    /// Replace the configuration
    ///
    /// Invalid configurations are rejected and leave the previous one in
    /// place. A loaded session picks the new configuration up when capture
    /// starts, except for a new backend selection, which needs another
    /// [`load`](Self::load).
    pub fn configure(&self, config: CaptureConfig) -> Result<()> {
        self.with_inner(|inner| {
            self.reject_while_capturing("change configuration")?;
            config.validate()?;

            if inner.pinned {
                if let Some(kind) = inner.backend_kind {
                    if config.backend != BackendKind::Auto && config.backend != kind {
                        return Err(CaptureError::config(format!(
                            "Session is bound to the {} backend, cannot switch to {}",
                            kind, config.backend
                        )));
                    }
                }
            } else if config.backend != inner.config.backend {
                if inner.loaded.is_some() {
                    debug!("Backend selection changed, replacing it on next load");
                    inner.backend_stale = true;
                } else if let Some(mut old) = inner.backend.take() {
                    debug!("Backend selection changed, dropping {} backend", old.kind());
                    old.unload()?;
                    inner.backend_kind = None;
                }
            }

            debug!("Configuration updated: {:?}", config);
            inner.config = config;
            Ok(())
        })
    }

    /// Set the output resolution (0, 0 = native)
    pub fn set_resolution(&self, width: u32, height: u32) -> Result<()> {
        let config = self.config().with_resolution(width, height);
        self.configure(config)
    }

    /// Set the refresh rate (0 = uncapped)
    pub fn set_refresh_rate(&self, fps: u32) -> Result<()> {
        let config = self.config().with_refresh_rate(fps);
        self.configure(config)
    }

    /// Current configuration
    pub fn config(&self) -> CaptureConfig {
        self.inner.lock().config.clone()
    }

    /// Register the consumer callback
    ///
    /// Must happen before [`load`](Self::load).
    pub fn on_frame<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(&[u8], u64) + Send + 'static,
    {
        self.with_inner(|inner| {
            if inner.handlers_frozen {
                return Err(CaptureError::invalid_state(
                    "Frame handler must be registered before load",
                ));
            }
            inner.frame_handler = Some(Box::new(handler));
            Ok(())
        })
    }

    /// Register the error callback
    ///
    /// Must happen before [`load`](Self::load).
    pub fn on_error<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&str, i32) + Send + Sync + 'static,
    {
        self.set_error_handler(Arc::new(handler))
    }

    fn set_error_handler(&self, handler: ErrorHandler) -> Result<()> {
        self.with_inner(|inner| {
            if inner.handlers_frozen {
                return Err(CaptureError::invalid_state(
                    "Error handler must be registered before load",
                ));
            }
            inner.error_handler = Some(handler);
            Ok(())
        })
    }

    /// Source names, enumerating on first use
    pub fn list_sources(&self) -> Result<Vec<String>> {
        self.with_inner(|inner| {
            if inner.catalog.is_enumerated() {
                return Ok(inner.catalog.names());
            }
            inner.ensure_backend()?;
            let Inner {
                catalog, backend, ..
            } = inner;
            let backend = backend
                .as_mut()
                .ok_or_else(|| CaptureError::invalid_state("No capture backend"))?;
            catalog.list(backend.as_mut())
        })
    }

    /// Re-enumerate sources, keeping the selection when it still exists
    pub fn refresh_sources(&self) -> Result<Vec<String>> {
        self.with_inner(|inner| {
            self.reject_while_capturing("refresh sources")?;
            inner.ensure_backend()?;
            let Inner {
                catalog, backend, ..
            } = inner;
            let backend = backend
                .as_mut()
                .ok_or_else(|| CaptureError::invalid_state("No capture backend"))?;
            catalog.enumerate(backend.as_mut())?;
            Ok(catalog.names())
        })
    }

    /// Select the source to capture by name
    pub fn select_source(&self, name: &str) -> Result<()> {
        self.with_inner(|inner| inner.catalog.select(name))
    }

    /// The selected source
    pub fn selected_source(&self) -> Option<CaptureSource> {
        self.inner.lock().catalog.selected().cloned()
    }

    /// All known sources
    pub fn sources(&self) -> Vec<CaptureSource> {
        self.inner.lock().catalog.sources().to_vec()
    }

    /// Kind of the backend in use, once created
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.inner.lock().backend_kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Capture statistics for the current or last capture
    pub fn stats(&self) -> CaptureStats {
        self.control.metrics.stats()
    }

    /// Handle that can stop capture from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: self.control.clone(),
        }
    }

    /// Enumerate sources and load the backend for the selected one
    ///
    /// Valid from `Uninitialized`, `Loaded` and `Stopped`. Handlers are frozen
    /// from here on. On failure the state is unchanged.
    pub fn load(&self) -> Result<()> {
        self.with_inner(|inner| {
            if self.control.loop_active.load(Ordering::SeqCst) {
                return Err(CaptureError::invalid_state(
                    "Capture loop is still shutting down",
                ));
            }
            let state = self.control.state();
            if state == SessionState::Capturing {
                return Err(CaptureError::invalid_state("Cannot load while capturing"));
            }

            inner.config.validate()?;
            if inner.backend_stale {
                if let Some(mut old) = inner.backend.take() {
                    debug!("Replacing {} backend", old.kind());
                    if let Err(e) = old.unload() {
                        warn!("Backend unload failed: {}", e);
                    }
                }
                inner.backend_kind = None;
                inner.loaded = None;
                inner.backend_stale = false;
                self.control.set_state(SessionState::Uninitialized);
            }
            inner.ensure_backend()?;

            let Inner {
                catalog,
                backend,
                config,
                ..
            } = &mut *inner;
            let backend = backend
                .as_mut()
                .ok_or_else(|| CaptureError::invalid_state("No capture backend"))?;
            catalog.enumerate(backend.as_mut())?;
            let source = catalog
                .selected()
                .cloned()
                .ok_or(CaptureError::NoSourcesFound)?;

            backend.load(&source, config)?;
            info!(
                "Session loaded: {} via {} backend",
                source.name,
                backend.kind()
            );

            inner.loaded = Some(LoadedTarget {
                source,
                config: inner.config.clone(),
            });
            inner.handlers_frozen = true;
            self.control.stop_pending.store(false, Ordering::SeqCst);
            self.control.set_state(SessionState::Loaded);
            Ok(())
        })
    }

    /// Capture until stopped or a fatal error
    ///
    /// Blocks the calling thread. Returns once the loop has exited, the
    /// consumer worker has drained and joined, and per-capture resources are
    /// released. A stop issued after `load` but before the loop started
    /// makes this return at once, leaving the session `Stopped`.
    pub fn start_capture(&self) -> Result<()> {
        let started = self.with_inner(|inner| {
            if self.control.loop_active.load(Ordering::SeqCst) {
                return Err(CaptureError::invalid_state("Capture loop already running"));
            }
            match self.control.state() {
                SessionState::Loaded => {}
                SessionState::Stopped => {
                    return Err(CaptureError::invalid_state(
                        "Session is stopped; call load() before starting again",
                    ))
                }
                other => {
                    return Err(CaptureError::invalid_state(format!(
                        "Cannot start capture while {}",
                        other
                    )))
                }
            }
            if inner.frame_handler.is_none() {
                return Err(CaptureError::invalid_state("No frame handler registered"));
            }
            if inner.backend_stale {
                return Err(CaptureError::invalid_state(
                    "Backend selection changed; call load() before starting",
                ));
            }

            let source = inner
                .catalog
                .selected()
                .cloned()
                .ok_or(CaptureError::NoSourcesFound)?;
            let target = LoadedTarget {
                source,
                config: inner.config.clone(),
            };
            let backend = inner
                .backend
                .as_mut()
                .ok_or_else(|| CaptureError::invalid_state("No capture backend"))?;
            if inner.loaded.as_ref() != Some(&target) {
                debug!("Selection or configuration changed since load, reloading backend");
                backend.load(&target.source, &target.config)?;
                inner.loaded = Some(target.clone());
            }

            let (Some(backend), Some(handler)) = (inner.backend.take(), inner.frame_handler.take())
            else {
                return Err(CaptureError::invalid_state("No capture backend"));
            };

            self.control.metrics.reset();
            if !self.control.begin_capture() {
                inner.backend = Some(backend);
                inner.frame_handler = Some(handler);
                return Ok(None);
            }
            inner.catalog.freeze();
            self.control.loop_active.store(true, Ordering::SeqCst);
            Ok(Some((backend, handler, inner.error_handler.clone(), target)))
        })?;
        let Some((mut backend, handler, errors, target)) = started else {
            info!("Capture stopped before it started");
            return Ok(());
        };

        info!(
            "Capture started: {} at {}",
            target.source.name,
            match target.config.refresh_rate {
                0 => "uncapped".to_string(),
                fps => format!("{} fps", fps),
            }
        );

        let (result, handler) =
            self.run_capture(backend.as_mut(), handler, errors.as_ref(), &target.config);

        if let Err(e) = &result {
            error!("Capture ended with error: {}", e);
            if let Some(errors) = &errors {
                self.control
                    .gate
                    .deliver(|| errors(&e.to_string(), e.code()));
            }
        }

        {
            let mut inner = self.inner.lock();
            inner.backend = Some(backend);
            inner.frame_handler = handler;
            inner.catalog.unfreeze();
        }
        self.control.running.store(false, Ordering::SeqCst);
        self.control.gate.close();
        self.control.set_state(SessionState::Stopped);
        self.control.loop_active.store(false, Ordering::SeqCst);

        let stats = self.control.metrics.stats();
        info!("Capture finished: {}", stats.format_line());
        result
    }

    /// The capture loop proper
    fn run_capture(
        &self,
        backend: &mut dyn CaptureBackend,
        handler: FrameHandler,
        errors: Option<&ErrorHandler>,
        config: &CaptureConfig,
    ) -> (Result<()>, Option<FrameHandler>) {
        let spec = match backend.begin() {
            Ok(spec) => spec,
            Err(e) => return (Err(e), Some(handler)),
        };
        debug!(
            "Frame buffer: {}x{} {:?}, {} bytes",
            spec.width, spec.height, spec.content, spec.capacity
        );

        let control = &self.control;
        let mut dispatcher = match DeliveryDispatcher::spawn(
            handler,
            FrameBuffer::with_spec(spec),
            control.gate.clone(),
            control.metrics.clone(),
        ) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                if let Err(end) = backend.end() {
                    warn!("Backend cleanup failed: {}", end);
                }
                return (Err(e), None);
            }
        };

        let pacer = Pacer::new(config.refresh_rate);
        let mut sequence = 0u64;
        let mut result = Ok(());

        while control.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            match backend.grab() {
                Ok(Grab::Ready) => {}
                Ok(Grab::Recreated(warning)) => {
                    warn!("{}", warning);
                    if let Some(errors) = errors {
                        control
                            .gate
                            .deliver(|| errors(&warning.to_string(), warning.code()));
                    }
                    control.metrics.record_skipped();
                    pacer.pace(started);
                    continue;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            control.metrics.record_grab(started.elapsed());

            let waiting = Instant::now();
            let mut frame = match dispatcher.acquire() {
                Ok(frame) => frame,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            control.metrics.record_gate_wait(waiting.elapsed());

            if !control.running.load(Ordering::SeqCst) {
                dispatcher.release(frame);
                break;
            }

            frame.sequence = sequence;
            frame.captured_at = started;
            let producing = Instant::now();
            match backend.produce(&mut frame) {
                Ok(Produced::Frame) => {
                    control.metrics.record_produce(producing.elapsed());
                    sequence += 1;
                    if let Err(e) = dispatcher.submit(frame) {
                        result = Err(e);
                        break;
                    }
                }
                Ok(Produced::Empty) => {
                    control.metrics.record_skipped();
                    dispatcher.release(frame);
                }
                Err(e) => {
                    dispatcher.release(frame);
                    result = Err(e);
                    break;
                }
            }

            pacer.pace(started);
        }

        let handler = match dispatcher.shutdown() {
            Ok(handler) => Some(handler),
            Err(e) => {
                if result.is_ok() {
                    result = Err(e);
                }
                None
            }
        };
        if let Err(e) = backend.end() {
            warn!("Backend cleanup failed: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
        debug!("Capture loop exited after {} frames", sequence);

        (result, handler)
    }

    /// Signal the capture loop to stop
    ///
    /// Does not wait for the loop; [`start_capture`](Self::start_capture)
    /// returns once shutdown completes. No frame or error callback starts
    /// after this returns. Stopping a session that is not capturing does
    /// nothing.
    pub fn stop_capture(&self) {
        self.control.request_stop();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.control.request_stop();
        let mut inner = self.inner.lock();
        if let Some(mut backend) = inner.backend.take() {
            if let Err(e) = backend.unload() {
                warn!("Backend unload on drop failed: {}", e);
            }
        }
    }
}

/// Shape shared by capture sessions (video here, audio elsewhere)
pub trait Capturer {
    /// Prepare the capture for the selected source
    fn load(&self) -> Result<()>;

    /// Capture until stopped; blocks the calling thread
    fn start_capture(&self) -> Result<()>;

    /// Ask a running capture to stop
    fn stop_capture(&self);

    /// Register the error callback
    fn on_error(&self, handler: ErrorHandler) -> Result<()>;
}

impl Capturer for CaptureSession {
    fn load(&self) -> Result<()> {
        CaptureSession::load(self)
    }

    fn start_capture(&self) -> Result<()> {
        CaptureSession::start_capture(self)
    }

    fn stop_capture(&self) {
        CaptureSession::stop_capture(self)
    }

    fn on_error(&self, handler: ErrorHandler) -> Result<()> {
        self.set_error_handler(handler)
    }
}
