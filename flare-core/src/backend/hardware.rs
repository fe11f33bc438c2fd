//! Hardware capture backend
//!
//! Captures on the GPU and encodes in the same device session, so frames
//! leave the backend as a compressed bitstream. The vendor API is abstracted
//! by [`GpuDevice`]; [`HardwareBackend`] drives the session lifecycle:
//!
//! 1. open the device handle and a capture session
//! 2. open the encoder, check the codec, apply the preset, initialize
//! 3. register each capture slot as an encoder input resource
//! 4. create the output bitstream buffer
//!
//! Teardown runs the reverse: flush, destroy bitstream, unregister
//! resources, destroy encoder, destroy capture session, close handle.

use tracing::{debug, info, warn};

use super::{CaptureBackend, Grab, Produced};
use crate::catalog::SourceProvider;
use crate::config::{BackendKind, CaptureConfig, Codec, EncoderPreset};
use crate::error::{CaptureError, Result};
use crate::types::{CaptureSource, FrameBuffer, FrameContent, FrameSpec};

/// Most capture slots registered with the encoder at once
pub const MAX_REGISTERED_RESOURCES: usize = 2;

/// Consecutive session rebuilds tolerated before capture fails
pub const MAX_RECREATE_ATTEMPTS: u32 = 3;

/// Encoder input resource registered for a capture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Encoder output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitstreamHandle(pub u64);

/// What the device reports after opening a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    /// Captured frame width
    pub width: u32,
    /// Captured frame height
    pub height: u32,
    /// Number of device-side frame slots the capture cycles through
    pub slots: usize,
}

/// Device defaults for a codec/preset pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetConfig {
    /// Frames between keyframes
    pub gop_length: u32,
    /// Consecutive B-frames
    pub b_frames: u32,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            gop_length: 120,
            b_frames: 0,
        }
    }
}

/// Encoder parameters derived from the capture configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: Codec,
    pub preset: EncoderPreset,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

/// Result of a device grab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuGrab {
    /// A frame is ready in the given slot
    Ready(usize),
    /// The capture session was invalidated (mode switch, resize, ...)
    MustRecreate,
}

/// Vendor capture+encode API
///
/// Each method maps to one vendor call. Handles returned by the device are
/// opaque to the backend and handed back unchanged.
pub trait GpuDevice: Send {
    /// Device name for logs
    fn name(&self) -> &str;

    /// List capturable sources
    fn enumerate(&mut self) -> Result<Vec<CaptureSource>>;

    /// Create the device handle
    fn open_handle(&mut self) -> Result<()>;

    /// Start a capture session producing `width`x`height` frames
    fn open_capture(&mut self, source: &CaptureSource, width: u32, height: u32)
        -> Result<CaptureInfo>;

    /// Open an encode session on the device
    fn open_encoder(&mut self) -> Result<()>;

    /// Codecs the encoder supports
    fn supported_codecs(&mut self) -> Result<Vec<Codec>>;

    /// Device defaults for a codec and preset
    fn preset_config(&mut self, codec: Codec, preset: EncoderPreset) -> Result<PresetConfig>;

    /// Initialize the encoder
    fn init_encoder(&mut self, settings: &EncoderSettings, preset: &PresetConfig) -> Result<()>;

    /// Register a capture slot as encoder input
    fn register_resource(&mut self, slot: usize) -> Result<ResourceHandle>;

    /// Allocate the output bitstream buffer
    fn create_bitstream(&mut self) -> Result<BitstreamHandle>;

    /// Capture one frame into a slot
    fn grab(&mut self) -> Result<GpuGrab>;

    /// Map a registered resource for encoding
    fn map(&mut self, resource: ResourceHandle) -> Result<()>;

    /// Encode the mapped resource; false when the encoder produced no output yet
    fn encode(&mut self, resource: ResourceHandle, bitstream: BitstreamHandle) -> Result<bool>;

    /// Lock the bitstream and expose its bytes
    fn lock_bitstream(&mut self, bitstream: BitstreamHandle) -> Result<&[u8]>;

    /// Release a locked bitstream
    fn unlock_bitstream(&mut self, bitstream: BitstreamHandle) -> Result<()>;

    /// Release a mapped resource
    fn unmap(&mut self, resource: ResourceHandle) -> Result<()>;

    /// Send end-of-stream and drain the encoder
    fn flush(&mut self) -> Result<()>;

    fn destroy_bitstream(&mut self, bitstream: BitstreamHandle) -> Result<()>;

    fn unregister_resource(&mut self, resource: ResourceHandle) -> Result<()>;

    fn destroy_encoder(&mut self) -> Result<()>;

    fn destroy_capture(&mut self) -> Result<()>;

    fn close_handle(&mut self) -> Result<()>;
}

/// Live capture+encode session state
///
/// Tracks what has been created so teardown only undoes completed steps.
#[derive(Debug, Default)]
pub struct EncoderSession {
    handle_open: bool,
    capture: Option<CaptureInfo>,
    encoder_open: bool,
    settings: Option<EncoderSettings>,
    resources: Vec<ResourceHandle>,
    bitstream: Option<BitstreamHandle>,
}

impl EncoderSession {
    /// Open a full session, undoing partial work on failure
    pub fn open<D: GpuDevice + ?Sized>(
        device: &mut D,
        source: &CaptureSource,
        config: &CaptureConfig,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut session = Self::default();
        match session.setup(device, source, config, width, height) {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(cleanup) = session.teardown(device) {
                    warn!("Cleanup after failed setup also failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn setup<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        source: &CaptureSource,
        config: &CaptureConfig,
        width: u32,
        height: u32,
    ) -> Result<()> {
        device.open_handle()?;
        self.handle_open = true;

        let capture = device.open_capture(source, width, height)?;
        self.capture = Some(capture);
        debug!(
            "{} capture opened: {}x{}, {} slot(s)",
            device.name(),
            capture.width,
            capture.height,
            capture.slots
        );

        device.open_encoder()?;
        self.encoder_open = true;

        let codecs = device.supported_codecs()?;
        if !codecs.contains(&config.codec) {
            return Err(CaptureError::UnsupportedCodec(format!(
                "{} is not supported by {}",
                config.codec.display_name(),
                device.name()
            )));
        }

        let preset = device.preset_config(config.codec, config.encoder_preset)?;
        let settings = EncoderSettings {
            codec: config.codec,
            preset: config.encoder_preset,
            width: capture.width,
            height: capture.height,
            fps: if config.refresh_rate == 0 { 60 } else { config.refresh_rate },
            bitrate_kbps: config.effective_bitrate(capture.width, capture.height),
        };
        device.init_encoder(&settings, &preset)?;
        self.settings = Some(settings);

        let slots = capture.slots.min(MAX_REGISTERED_RESOURCES);
        if slots < capture.slots {
            debug!(
                "Registering {} of {} capture slots",
                slots, capture.slots
            );
        }
        for slot in 0..slots {
            let resource = device.register_resource(slot)?;
            self.resources.push(resource);
        }

        self.bitstream = Some(device.create_bitstream()?);
        Ok(())
    }

    /// Release everything the session created
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub fn teardown<D: GpuDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        let mut first: Option<CaptureError> = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!("Hardware teardown: {} failed: {}", step, e);
                first.get_or_insert(e);
            }
        };

        if self.settings.take().is_some() {
            record("flush", device.flush());
        }
        if let Some(bitstream) = self.bitstream.take() {
            record("destroy bitstream", device.destroy_bitstream(bitstream));
        }
        for resource in self.resources.drain(..) {
            record("unregister resource", device.unregister_resource(resource));
        }
        if std::mem::take(&mut self.encoder_open) {
            record("destroy encoder", device.destroy_encoder());
        }
        if self.capture.take().is_some() {
            record("destroy capture", device.destroy_capture());
        }
        if std::mem::take(&mut self.handle_open) {
            record("close handle", device.close_handle());
        }

        first.map_or(Ok(()), Err)
    }

    /// Capture geometry, once opened
    pub fn capture(&self) -> Option<CaptureInfo> {
        self.capture
    }

    /// Encoder settings, once initialized
    pub fn settings(&self) -> Option<&EncoderSettings> {
        self.settings.as_ref()
    }

    /// Registered input resources
    pub fn resources(&self) -> &[ResourceHandle] {
        &self.resources
    }

    /// Output bitstream buffer
    pub fn bitstream(&self) -> Option<BitstreamHandle> {
        self.bitstream
    }
}

/// Upper bound for one encoded frame
fn encoded_capacity(width: u32, height: u32) -> usize {
    (width as usize * height as usize * 3).max(64 * 1024)
}

/// Loaded capture target
#[derive(Debug, Clone)]
struct Target {
    source: CaptureSource,
    config: CaptureConfig,
    width: u32,
    height: u32,
}

/// GPU capture plus hardware encode
pub struct HardwareBackend<D: GpuDevice> {
    device: D,
    target: Option<Target>,
    session: Option<EncoderSession>,
    pending: Option<usize>,
    recreate_attempts: u32,
}

impl<D: GpuDevice> HardwareBackend<D> {
    /// Create a backend over a device
    pub fn new(device: D) -> Self {
        Self {
            device,
            target: None,
            session: None,
            pending: None,
            recreate_attempts: 0,
        }
    }

    /// The underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current encoder session, if open
    pub fn session(&self) -> Option<&EncoderSession> {
        self.session.as_ref()
    }

    fn open_session(&mut self) -> Result<()> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_state("Hardware backend is not loaded"))?;
        let session = EncoderSession::open(
            &mut self.device,
            &target.source,
            &target.config,
            target.width,
            target.height,
        )?;
        self.session = Some(session);
        Ok(())
    }

    fn close_session(&mut self) -> Result<()> {
        self.pending = None;
        match self.session.take() {
            Some(mut session) => session.teardown(&mut self.device),
            None => Ok(()),
        }
    }

    fn recreate(&mut self) -> Result<Grab> {
        self.recreate_attempts += 1;
        if self.recreate_attempts > MAX_RECREATE_ATTEMPTS {
            return Err(CaptureError::acquisition(format!(
                "{} session invalidated {} times in a row",
                self.device.name(),
                self.recreate_attempts - 1
            )));
        }

        if let Err(e) = self.close_session() {
            warn!("Teardown before recreate failed: {}", e);
        }
        self.open_session()?;

        let message = format!(
            "{} session rebuilt (attempt {}/{})",
            self.device.name(),
            self.recreate_attempts,
            MAX_RECREATE_ATTEMPTS
        );
        info!("{}", message);
        Ok(Grab::Recreated(CaptureError::SessionRecreated(message)))
    }

    fn copy_bitstream(&mut self, bitstream: BitstreamHandle, frame: &mut FrameBuffer) -> Result<()> {
        let copied = self
            .device
            .lock_bitstream(bitstream)
            .and_then(|data| frame.write(data));
        let unlocked = self.device.unlock_bitstream(bitstream);
        copied?;
        unlocked
    }
}

impl<D: GpuDevice> SourceProvider for HardwareBackend<D> {
    fn enumerate_sources(&mut self) -> Result<Vec<CaptureSource>> {
        self.device.enumerate()
    }
}

impl<D: GpuDevice> CaptureBackend for HardwareBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn load(&mut self, source: &CaptureSource, config: &CaptureConfig) -> Result<()> {
        if let Err(e) = self.close_session() {
            warn!("Teardown of previous session failed: {}", e);
        }

        let (width, height) = config.output_size(source.geometry.width, source.geometry.height);
        // Hardware encoders work on 4:2:0 surfaces
        let (width, height) = (width & !1, height & !1);
        if width == 0 || height == 0 {
            return Err(CaptureError::config(format!(
                "Source {} is too small to encode",
                source
            )));
        }

        self.target = Some(Target {
            source: source.clone(),
            config: config.clone(),
            width,
            height,
        });
        if let Err(e) = self.open_session() {
            self.target = None;
            return Err(e);
        }

        info!(
            "Hardware capture loaded: {} -> {}x{} {} ({})",
            source.name,
            width,
            height,
            config.codec.display_name(),
            self.device.name()
        );
        Ok(())
    }

    fn begin(&mut self) -> Result<FrameSpec> {
        if self.session.is_none() {
            self.open_session()?;
        }
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_state("Hardware backend is not loaded"))?;

        self.recreate_attempts = 0;
        self.pending = None;
        Ok(FrameSpec {
            width: target.width,
            height: target.height,
            content: FrameContent::Encoded(target.config.codec),
            capacity: encoded_capacity(target.width, target.height),
        })
    }

    fn grab(&mut self) -> Result<Grab> {
        let resources = self
            .session
            .as_ref()
            .map(|session| session.resources.len())
            .ok_or_else(|| CaptureError::invalid_state("Hardware capture not started"))?;

        match self.device.grab()? {
            GpuGrab::Ready(slot) if slot < resources => {
                self.recreate_attempts = 0;
                self.pending = Some(slot);
                Ok(Grab::Ready)
            }
            GpuGrab::Ready(slot) => Err(CaptureError::acquisition(format!(
                "Device returned unregistered slot {}",
                slot
            ))),
            GpuGrab::MustRecreate => self.recreate(),
        }
    }

    fn produce(&mut self, frame: &mut FrameBuffer) -> Result<Produced> {
        let slot = self
            .pending
            .take()
            .ok_or_else(|| CaptureError::invalid_state("No grabbed frame to encode"))?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CaptureError::invalid_state("Hardware capture not started"))?;
        let resource = session.resources[slot];
        let bitstream = session
            .bitstream
            .ok_or_else(|| CaptureError::invalid_state("No bitstream buffer"))?;

        self.device.map(resource)?;
        let produced = match self.device.encode(resource, bitstream) {
            Ok(true) => self
                .copy_bitstream(bitstream, frame)
                .map(|()| Produced::Frame),
            Ok(false) => Ok(Produced::Empty),
            Err(e) => Err(e),
        };
        let unmapped = self.device.unmap(resource);

        let produced = produced?;
        unmapped?;
        Ok(produced)
    }

    fn end(&mut self) -> Result<()> {
        let result = self.close_session();
        debug!("Hardware capture stopped");
        result
    }

    fn unload(&mut self) -> Result<()> {
        let result = self.close_session();
        self.target = None;
        result
    }
}

impl<D: GpuDevice> Drop for HardwareBackend<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close_session() {
            warn!("Hardware teardown on drop failed: {}", e);
        }
    }
}
