//! Capture backends
//!
//! A backend owns the platform or vendor capture session and produces one
//! frame per loop iteration:
//! - [`SoftwareBackend`]: shared-memory grab, converted on the CPU
//! - [`HardwareBackend`]: GPU capture and encode, delivers a bitstream
//!
//! The backend is picked at runtime by [`create_backend`]. Each iteration is
//! split in two so the session can wait for the previous delivery between
//! them: [`CaptureBackend::grab`] acquires source pixels and
//! [`CaptureBackend::produce`] writes the deliverable frame.

pub mod hardware;
pub mod nvenc;
pub mod nvidia;
pub mod software;
pub mod x11;

pub use hardware::{
    BitstreamHandle, CaptureInfo, EncoderSession, EncoderSettings, GpuDevice, GpuGrab,
    HardwareBackend, PresetConfig, ResourceHandle, MAX_RECREATE_ATTEMPTS,
    MAX_REGISTERED_RESOURCES,
};
pub use software::{FrameGrabber, GrabFormat, SoftwareBackend};
pub use x11::X11Grabber;

use tracing::info;

use crate::catalog::SourceProvider;
use crate::config::{BackendKind, CaptureConfig};
use crate::error::{CaptureError, Result};
use crate::detect;
use crate::types::{CaptureSource, FrameBuffer, FrameSpec};

/// Outcome of acquiring source pixels
#[derive(Debug)]
pub enum Grab {
    /// Pixels are ready for [`CaptureBackend::produce`]
    Ready,
    /// The session was rebuilt; nothing to produce this iteration
    Recreated(CaptureError),
}

/// Outcome of producing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produced {
    /// The buffer holds a frame to deliver
    Frame,
    /// Nothing to deliver this iteration (e.g. encoder still buffering)
    Empty,
}

/// A capture backend
///
/// Lifecycle: [`load`](Self::load) once per session load, then for each
/// capture [`begin`](Self::begin), any number of
/// [`grab`](Self::grab)/[`produce`](Self::produce) pairs, and
/// [`end`](Self::end). [`unload`](Self::unload) releases everything.
pub trait CaptureBackend: SourceProvider + Send {
    /// Which variant this is
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Open the platform session for `source`
    fn load(&mut self, source: &CaptureSource, config: &CaptureConfig) -> Result<()>;

    /// Allocate per-capture resources and describe the frames to expect
    fn begin(&mut self) -> Result<FrameSpec>;

    /// Acquire the source pixels for one iteration
    fn grab(&mut self) -> Result<Grab>;

    /// Write the frame for the last grab into `frame`
    fn produce(&mut self, frame: &mut FrameBuffer) -> Result<Produced>;

    /// Release per-capture resources
    fn end(&mut self) -> Result<()>;

    /// Release everything opened by `load`
    fn unload(&mut self) -> Result<()>;
}

/// Create the backend for a configuration
///
/// `Auto` resolves through [`detect::resolve`](crate::detect::resolve).
pub fn create_backend(config: &CaptureConfig) -> Result<Box<dyn CaptureBackend>> {
    let backend: Box<dyn CaptureBackend> = match detect::resolve(config.backend)? {
        BackendKind::Hardware => Box::new(HardwareBackend::new(nvenc::NvencDevice::new()?)),
        _ => Box::new(SoftwareBackend::new(X11Grabber::new())),
    };
    info!("Using {} capture backend ({})", backend.kind(), backend.name());
    Ok(backend)
}

