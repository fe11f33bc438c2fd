//! NVENC capture+encode device via FFmpeg
//!
//! Pixels come from the X11 shared-memory grabber; each capture slot is an
//! NV12 frame the BGRA grab is scaled into, and the slot is encoded by the
//! FFmpeg `*_nvenc` encoder for the configured codec.
//!
//! Packets still queued in the encoder at teardown cannot be delivered, so
//! sessions are opened without B-frames and every frame leaves the encoder
//! as soon as it is sent.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, Flags};
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, info, trace, warn};

use super::hardware::{
    BitstreamHandle, CaptureInfo, EncoderSettings, GpuDevice, GpuGrab, PresetConfig, ResourceHandle,
};
use super::software::{FrameGrabber, GrabFormat};
use super::x11::X11Grabber;
use crate::config::{Codec, EncoderPreset};
use crate::convert::copy_in;
use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;
use crate::types::CaptureSource;

/// NV12 frames the grab is cycled through
const CAPTURE_SLOTS: usize = 2;

/// Capture side of the session
struct Capture {
    grab: GrabFormat,
    source: Video,
    scaler: scaling::Context,
    slots: Vec<Video>,
    next_slot: usize,
}

/// FFmpeg NVENC device
pub struct NvencDevice<G: FrameGrabber = X11Grabber> {
    grabber: G,
    capture: Option<Capture>,
    encoder: Option<encoder::video::Encoder>,
    packet: ffmpeg::Packet,
    bitstream: Vec<u8>,
    frame_count: u64,
}

// SAFETY: the FFmpeg contexts and frames are owned exclusively by this
// device and only touched through `&mut self`; FFmpeg allows contexts to
// move between threads as long as calls on one context are not concurrent.
unsafe impl<G: FrameGrabber> Send for NvencDevice<G> {}

impl NvencDevice<X11Grabber> {
    /// Create the device; fails when FFmpeg has no NVENC encoder at all
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| CaptureError::encoder(format!("FFmpeg init failed: {}", e)))?;
        if !Codec::ALL.iter().any(|codec| encoder_available(*codec)) {
            return Err(CaptureError::Unsupported(
                "FFmpeg was built without NVENC encoders".into(),
            ));
        }
        Ok(Self::with_grabber(X11Grabber::new()))
    }
}

impl<G: FrameGrabber> NvencDevice<G> {
    /// Create the device over another pixel source
    pub fn with_grabber(grabber: G) -> Self {
        Self {
            grabber,
            capture: None,
            encoder: None,
            packet: ffmpeg::Packet::empty(),
            bitstream: Vec::new(),
            frame_count: 0,
        }
    }

    fn capture_mut(&mut self) -> Result<&mut Capture> {
        self.capture
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC capture is not open"))
    }

    fn encoder_mut(&mut self) -> Result<&mut encoder::video::Encoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC encoder is not initialized"))
    }

    /// Pull every ready packet into the bitstream buffer
    fn receive_packets(&mut self) -> Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC encoder is not initialized"))?;
        let mut packets = 0;
        loop {
            match encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    if let Some(data) = self.packet.data() {
                        self.bitstream.extend_from_slice(data);
                    }
                    trace!(
                        "Encoded packet: pts={:?}, size={}, keyframe={}",
                        self.packet.pts(),
                        self.packet.size(),
                        self.packet.is_key()
                    );
                    packets += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(CaptureError::encoder(format!("Failed to receive packet: {}", e)));
                }
            }
        }
        Ok(packets)
    }
}

/// Whether FFmpeg provides the NVENC encoder for a codec
pub fn encoder_available(codec: Codec) -> bool {
    encoder::find_by_name(codec.nvenc_encoder()).is_some()
}

/// Encoder layout for a quality preset
///
/// Slower presets get a longer GOP; no preset uses B-frames.
pub fn preset_layout(preset: EncoderPreset) -> PresetConfig {
    let gop_length = match preset {
        EncoderPreset::Slow | EncoderPreset::Quality => 240,
        EncoderPreset::Fast | EncoderPreset::Medium => 120,
    };
    PresetConfig {
        gop_length,
        b_frames: 0,
    }
}

impl<G: FrameGrabber> GpuDevice for NvencDevice<G> {
    fn name(&self) -> &str {
        "nvenc"
    }

    fn enumerate(&mut self) -> Result<Vec<CaptureSource>> {
        self.grabber.enumerate()
    }

    fn open_handle(&mut self) -> Result<()> {
        ffmpeg::init().map_err(|e| CaptureError::encoder(format!("FFmpeg init failed: {}", e)))?;
        Ok(())
    }

    fn open_capture(&mut self, source: &CaptureSource, width: u32, height: u32) -> Result<CaptureInfo> {
        let grab = self.grabber.attach(source)?;
        if grab.format != PixelFormat::Bgra {
            self.grabber.detach()?;
            return Err(CaptureError::Unsupported(format!(
                "NVENC capture needs BGRA input, display delivers {}",
                grab.format
            )));
        }

        let scaler = match scaling::Context::get(
            Pixel::BGRA,
            grab.width,
            grab.height,
            Pixel::NV12,
            width,
            height,
            Flags::BILINEAR,
        ) {
            Ok(scaler) => scaler,
            Err(e) => {
                self.grabber.detach()?;
                return Err(CaptureError::conversion(format!("Failed to create scaler: {}", e)));
            }
        };
        debug!(
            "NVENC scaler: BGRA {}x{} -> NV12 {}x{}",
            grab.width, grab.height, width, height
        );

        self.capture = Some(Capture {
            grab,
            source: Video::new(Pixel::BGRA, grab.width, grab.height),
            scaler,
            slots: (0..CAPTURE_SLOTS)
                .map(|_| Video::new(Pixel::NV12, width, height))
                .collect(),
            next_slot: 0,
        });
        Ok(CaptureInfo {
            width,
            height,
            slots: CAPTURE_SLOTS,
        })
    }

    fn open_encoder(&mut self) -> Result<()> {
        // FFmpeg opens the session together with the codec in init_encoder
        Ok(())
    }

    fn supported_codecs(&mut self) -> Result<Vec<Codec>> {
        Ok(Codec::ALL
            .iter()
            .copied()
            .filter(|codec| encoder_available(*codec))
            .collect())
    }

    fn preset_config(&mut self, _codec: Codec, preset: EncoderPreset) -> Result<PresetConfig> {
        Ok(preset_layout(preset))
    }

    fn init_encoder(&mut self, settings: &EncoderSettings, preset: &PresetConfig) -> Result<()> {
        let name = settings.codec.nvenc_encoder();
        let codec = encoder::find_by_name(name)
            .ok_or_else(|| CaptureError::UnsupportedCodec(format!("Encoder {} not found", name)))?;

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        let fps = settings.fps as i32;
        let bitrate = settings.bitrate_kbps as usize * 1000;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::NV12);
        video.set_time_base(Rational::new(1, fps));
        video.set_frame_rate(Some(Rational::new(fps, 1)));
        video.set_bit_rate(bitrate);
        video.set_max_bit_rate(bitrate * 2);
        video.set_gop(preset.gop_length);
        video.set_max_b_frames(preset.b_frames as usize);

        let mut opts = Dictionary::new();
        opts.set("preset", settings.preset.nvenc_preset());
        opts.set("tune", "ll");
        opts.set("zerolatency", "1");
        opts.set("rc", "cbr");
        opts.set("gpu", "0");
        match settings.codec {
            Codec::H264 => opts.set("profile", "high"),
            Codec::Hevc => opts.set("profile", "main"),
            Codec::Av1 => {}
        }

        let encoder = video
            .open_with(opts)
            .map_err(|e| CaptureError::encoder(format!("Failed to open {}: {}", name, e)))?;

        info!(
            "NVENC encoder opened: {} {}x{} @ {}fps, {}kbps",
            name, settings.width, settings.height, settings.fps, settings.bitrate_kbps
        );
        self.encoder = Some(encoder);
        self.frame_count = 0;
        Ok(())
    }

    fn register_resource(&mut self, slot: usize) -> Result<ResourceHandle> {
        let slots = self.capture_mut()?.slots.len();
        if slot >= slots {
            return Err(CaptureError::resource(format!(
                "Capture slot {} does not exist ({} slots)",
                slot, slots
            )));
        }
        Ok(ResourceHandle(slot as u64))
    }

    fn create_bitstream(&mut self) -> Result<BitstreamHandle> {
        let capture = self.capture_mut()?;
        let capacity = capture.grab.width as usize * capture.grab.height as usize / 2;
        self.bitstream = Vec::with_capacity(capacity);
        Ok(BitstreamHandle(0))
    }

    fn grab(&mut self) -> Result<GpuGrab> {
        if self.grabber.source_changed()? {
            debug!("Source geometry changed, session must be rebuilt");
            return Ok(GpuGrab::MustRecreate);
        }
        self.grabber.grab()?;

        let capture = self.capture_mut()?;
        let slot = capture.next_slot;
        capture.next_slot = (slot + 1) % capture.slots.len();
        Ok(GpuGrab::Ready(slot))
    }

    fn map(&mut self, resource: ResourceHandle) -> Result<()> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC capture is not open"))?;
        copy_in(
            self.grabber.frame(),
            PixelFormat::Bgra,
            capture.grab.width,
            capture.grab.height,
            &mut capture.source,
        );

        let slot = capture
            .slots
            .get_mut(resource.0 as usize)
            .ok_or_else(|| CaptureError::invalid_state("Unknown capture slot"))?;
        capture
            .scaler
            .run(&capture.source, slot)
            .map_err(|e| CaptureError::conversion(format!("Scaling failed: {}", e)))
    }

    fn encode(&mut self, resource: ResourceHandle, _bitstream: BitstreamHandle) -> Result<bool> {
        let pts = self.frame_count as i64;
        self.frame_count += 1;

        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC capture is not open"))?;
        let frame = capture
            .slots
            .get_mut(resource.0 as usize)
            .ok_or_else(|| CaptureError::invalid_state("Unknown capture slot"))?;
        frame.set_pts(Some(pts));

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| CaptureError::invalid_state("NVENC encoder is not initialized"))?;
        encoder
            .send_frame(frame)
            .map_err(|e| CaptureError::encoder(format!("Failed to send frame: {}", e)))?;

        self.bitstream.clear();
        Ok(self.receive_packets()? > 0)
    }

    fn lock_bitstream(&mut self, _bitstream: BitstreamHandle) -> Result<&[u8]> {
        Ok(&self.bitstream)
    }

    fn unlock_bitstream(&mut self, _bitstream: BitstreamHandle) -> Result<()> {
        Ok(())
    }

    fn unmap(&mut self, _resource: ResourceHandle) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.encoder_mut()?
            .send_eof()
            .map_err(|e| CaptureError::encoder(format!("Failed to send EOF: {}", e)))?;
        self.bitstream.clear();
        let drained = self.receive_packets()?;
        if drained > 0 {
            warn!("NVENC flushed, {} trailing packet(s) dropped", drained);
        } else {
            debug!("NVENC flushed");
        }
        Ok(())
    }

    fn destroy_bitstream(&mut self, _bitstream: BitstreamHandle) -> Result<()> {
        self.bitstream = Vec::new();
        Ok(())
    }

    fn unregister_resource(&mut self, _resource: ResourceHandle) -> Result<()> {
        Ok(())
    }

    fn destroy_encoder(&mut self) -> Result<()> {
        self.encoder = None;
        Ok(())
    }

    fn destroy_capture(&mut self) -> Result<()> {
        self.capture = None;
        self.grabber.detach()
    }

    fn close_handle(&mut self) -> Result<()> {
        Ok(())
    }
}
