//! Software capture backend
//!
//! Grabs the selected source through a shared-memory channel and converts
//! the packed pixels into the configured output format on the CPU.

use tracing::{debug, info};

use super::{CaptureBackend, Grab, Produced};
use crate::catalog::SourceProvider;
use crate::config::{BackendKind, CaptureConfig};
use crate::convert::FrameConverter;
use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;
use crate::types::{CaptureSource, FrameBuffer, FrameSpec};

/// Layout of the frames a grabber delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabFormat {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Shared-memory frame source
pub trait FrameGrabber: Send {
    /// Grabber name for logs
    fn name(&self) -> &str;

    /// List capturable sources
    fn enumerate(&mut self) -> Result<Vec<CaptureSource>>;

    /// Allocate the shared segment for `source` and report its layout
    fn attach(&mut self, source: &CaptureSource) -> Result<GrabFormat>;

    /// Copy the current source contents into the shared segment
    ///
    /// Blocks until the platform has finished the copy.
    fn grab(&mut self) -> Result<()>;

    /// Pixels from the last grab
    fn frame(&self) -> &[u8];

    /// Whether the attached source changed size since `attach`
    fn source_changed(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Release the shared segment
    fn detach(&mut self) -> Result<()>;

    /// Drop the platform connection
    fn disconnect(&mut self) {}
}

/// Loaded capture target
#[derive(Debug, Clone)]
struct Target {
    source: CaptureSource,
    config: CaptureConfig,
}

/// Shared-memory grab plus CPU conversion
pub struct SoftwareBackend<G: FrameGrabber> {
    grabber: G,
    target: Option<Target>,
    converter: Option<FrameConverter>,
}

impl<G: FrameGrabber> SoftwareBackend<G> {
    /// Create a backend over a grabber
    pub fn new(grabber: G) -> Self {
        Self {
            grabber,
            target: None,
            converter: None,
        }
    }

    /// The underlying grabber
    pub fn grabber(&self) -> &G {
        &self.grabber
    }
}

impl<G: FrameGrabber> SourceProvider for SoftwareBackend<G> {
    fn enumerate_sources(&mut self) -> Result<Vec<CaptureSource>> {
        self.grabber.enumerate()
    }
}

impl<G: FrameGrabber> CaptureBackend for SoftwareBackend<G> {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn name(&self) -> &str {
        self.grabber.name()
    }

    fn load(&mut self, source: &CaptureSource, config: &CaptureConfig) -> Result<()> {
        let (width, height) = config.output_size(source.geometry.width, source.geometry.height);
        if width == 0 || height == 0 {
            return Err(CaptureError::config(format!(
                "Source {} is too small to capture as {}",
                source, config.pixel_format
            )));
        }

        info!(
            "Software capture loaded: {} -> {}x{} {}",
            source.name, width, height, config.pixel_format
        );
        self.target = Some(Target {
            source: source.clone(),
            config: config.clone(),
        });
        Ok(())
    }

    fn begin(&mut self) -> Result<FrameSpec> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_state("Software backend is not loaded"))?;

        let grab = self.grabber.attach(&target.source)?;
        let (width, height) = target.config.output_size(grab.width, grab.height);
        let converter = match FrameConverter::new(
            grab.format,
            grab.width,
            grab.height,
            target.config.pixel_format,
            width,
            height,
            target.config.scale_filter,
        ) {
            Ok(converter) => converter,
            Err(e) => {
                self.grabber.detach()?;
                return Err(e);
            }
        };

        debug!(
            "Software capture started: grab {}x{} {}, output {}x{} {}",
            grab.width, grab.height, grab.format, width, height, target.config.pixel_format
        );
        self.converter = Some(converter);
        Ok(FrameSpec::raw(target.config.pixel_format, width, height))
    }

    fn grab(&mut self) -> Result<Grab> {
        self.grabber.grab()?;
        Ok(Grab::Ready)
    }

    fn produce(&mut self, frame: &mut FrameBuffer) -> Result<Produced> {
        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("Software capture not started"))?;
        converter.convert_into(self.grabber.frame(), frame)?;
        Ok(Produced::Frame)
    }

    fn end(&mut self) -> Result<()> {
        if self.converter.take().is_some() {
            self.grabber.detach()?;
            debug!("Software capture stopped");
        }
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        let result = self.end();
        self.target = None;
        self.grabber.disconnect();
        result
    }
}
