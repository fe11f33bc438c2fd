//! Mock infrastructure for testing
//!
//! Provides a scripted shared-memory grabber and GPU device so capture
//! sessions can run without a display server or a GPU.

#![allow(dead_code)]

use flare_core::backend::{
    BitstreamHandle, CaptureInfo, EncoderSettings, FrameGrabber, GpuDevice, GpuGrab, GrabFormat,
    PresetConfig, ResourceHandle,
};
use flare_core::config::{Codec, EncoderPreset};
use flare_core::error::{CaptureError, Result};
use flare_core::types::{CaptureSource, Geometry, SourceHandle};
use flare_core::PixelFormat;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Create a solid BGRA frame
///
/// `color` is in memory order: [B, G, R, A].
pub fn create_bgra_frame(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..(width * height) {
        data.extend_from_slice(&color);
    }
    data
}

/// Create a BGRA frame with a diagonal gradient
pub fn create_gradient_frame(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x as f32 / width as f32) * 255.0) as u8;
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            let b = (((x + y) as f32 / (width + height) as f32) * 255.0) as u8;
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    data
}

/// Monitor source named `Monitor-{index}`
pub fn monitor(index: u64, width: u32, height: u32) -> CaptureSource {
    CaptureSource::monitor(
        format!("Monitor-{}", index),
        SourceHandle::new(index + 1),
        Geometry::new((index as i32) * width as i32, 0, width, height),
    )
}

/// Window source
pub fn window(name: &str, id: u64, width: u32, height: u32) -> CaptureSource {
    CaptureSource::window(name, SourceHandle::new(id), Geometry::new(0, 0, width, height))
}

/// Counters shared between a mock grabber and the test
#[derive(Debug, Default, Clone)]
pub struct GrabberStats {
    pub enumerations: u32,
    pub attaches: u32,
    pub grabs: u64,
    pub detaches: u32,
    pub disconnects: u32,
    /// Name of the most recently attached source
    pub last_attached: Option<String>,
    pub attached: bool,
}

/// Scripted shared-memory grabber delivering BGRA frames
pub struct MockGrabber {
    sources: Vec<CaptureSource>,
    stats: Arc<Mutex<GrabberStats>>,
    fail_after: Option<u64>,
    grab_delay: Duration,
    color: [u8; 4],
    frame: Vec<u8>,
}

impl MockGrabber {
    /// Grabber reporting the given sources
    pub fn new(sources: Vec<CaptureSource>) -> Self {
        Self {
            sources,
            stats: Arc::new(Mutex::new(GrabberStats::default())),
            fail_after: None,
            grab_delay: Duration::ZERO,
            color: [0, 0, 255, 255],
            frame: Vec::new(),
        }
    }

    /// Grabber with `count` 1920x1080 monitors
    pub fn with_monitors(count: u64) -> Self {
        Self::new((0..count).map(|i| monitor(i, 1920, 1080)).collect())
    }

    /// Fail every grab after the first `grabs`
    pub fn fail_after(mut self, grabs: u64) -> Self {
        self.fail_after = Some(grabs);
        self
    }

    /// Sleep this long in every grab
    pub fn grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    /// Fill color in BGRA memory order
    pub fn color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    /// Counters that stay readable after the grabber moves into a backend
    pub fn stats(&self) -> Arc<Mutex<GrabberStats>> {
        self.stats.clone()
    }
}

impl FrameGrabber for MockGrabber {
    fn name(&self) -> &str {
        "mock-shm"
    }

    fn enumerate(&mut self) -> Result<Vec<CaptureSource>> {
        self.stats.lock().enumerations += 1;
        Ok(self.sources.clone())
    }

    fn attach(&mut self, source: &CaptureSource) -> Result<GrabFormat> {
        let mut stats = self.stats.lock();
        stats.attaches += 1;
        stats.last_attached = Some(source.name.clone());
        stats.attached = true;
        let (width, height) = (source.geometry.width, source.geometry.height);
        self.frame = create_bgra_frame(width, height, self.color);
        Ok(GrabFormat {
            format: PixelFormat::Bgra,
            width,
            height,
        })
    }

    fn grab(&mut self) -> Result<()> {
        if !self.grab_delay.is_zero() {
            std::thread::sleep(self.grab_delay);
        }
        let mut stats = self.stats.lock();
        if self.fail_after.is_some_and(|limit| stats.grabs >= limit) {
            return Err(CaptureError::acquisition("display connection lost"));
        }
        stats.grabs += 1;
        Ok(())
    }

    fn frame(&self) -> &[u8] {
        &self.frame
    }

    fn detach(&mut self) -> Result<()> {
        let mut stats = self.stats.lock();
        stats.detaches += 1;
        stats.attached = false;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stats.lock().disconnects += 1;
    }
}

/// Shared log of device calls
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Scripted GPU capture+encode device
pub struct MockDevice {
    pub calls: CallLog,
    pub codecs: Vec<Codec>,
    pub slots: usize,
    pub sources: Vec<CaptureSource>,
    /// Grab results handed out in order; `Ready` round-robin once empty
    pub grabs: Arc<Mutex<VecDeque<GpuGrab>>>,
    /// Steps that return a vendor error
    pub fail: Vec<&'static str>,
    /// Bitstream returned for every encoded frame
    pub output: Vec<u8>,
    next_slot: usize,
    registered: usize,
}

impl MockDevice {
    /// Device with H.264/HEVC support, 4 slots and one 1920x1080 monitor
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            codecs: vec![Codec::H264, Codec::Hevc],
            slots: 4,
            sources: vec![monitor(0, 1920, 1080)],
            grabs: Arc::new(Mutex::new(VecDeque::new())),
            fail: Vec::new(),
            output: vec![0, 0, 0, 1, 0x65, 0x88, 0x84],
            next_slot: 0,
            registered: 0,
        }
    }

    /// Queue grab results
    pub fn script(self, grabs: impl IntoIterator<Item = GpuGrab>) -> Self {
        self.grabs.lock().extend(grabs);
        self
    }

    fn step(&mut self, name: &'static str) -> Result<()> {
        self.calls.lock().push(name);
        if self.fail.contains(&name) {
            Err(CaptureError::vendor(-8, format!("{} failed", name)))
        } else {
            Ok(())
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Count occurrences of a call in the log
pub fn count_calls(log: &CallLog, name: &str) -> usize {
    log.lock().iter().filter(|call| **call == name).count()
}

impl GpuDevice for MockDevice {
    fn name(&self) -> &str {
        "mock-gpu"
    }

    fn enumerate(&mut self) -> Result<Vec<CaptureSource>> {
        Ok(self.sources.clone())
    }

    fn open_handle(&mut self) -> Result<()> {
        self.step("open_handle")
    }

    fn open_capture(&mut self, _: &CaptureSource, width: u32, height: u32) -> Result<CaptureInfo> {
        self.step("open_capture")?;
        Ok(CaptureInfo {
            width,
            height,
            slots: self.slots,
        })
    }

    fn open_encoder(&mut self) -> Result<()> {
        self.step("open_encoder")
    }

    fn supported_codecs(&mut self) -> Result<Vec<Codec>> {
        Ok(self.codecs.clone())
    }

    fn preset_config(&mut self, _: Codec, _: EncoderPreset) -> Result<PresetConfig> {
        Ok(PresetConfig::default())
    }

    fn init_encoder(&mut self, _: &EncoderSettings, _: &PresetConfig) -> Result<()> {
        self.step("init_encoder")
    }

    fn register_resource(&mut self, slot: usize) -> Result<ResourceHandle> {
        self.step("register")?;
        self.registered = slot + 1;
        Ok(ResourceHandle(slot as u64))
    }

    fn create_bitstream(&mut self) -> Result<BitstreamHandle> {
        self.step("create_bitstream")?;
        self.next_slot = 0;
        Ok(BitstreamHandle(1))
    }

    fn grab(&mut self) -> Result<GpuGrab> {
        self.step("grab")?;
        if let Some(grab) = self.grabs.lock().pop_front() {
            return Ok(grab);
        }
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.registered.max(1);
        Ok(GpuGrab::Ready(slot))
    }

    fn map(&mut self, _: ResourceHandle) -> Result<()> {
        self.step("map")
    }

    fn encode(&mut self, _: ResourceHandle, _: BitstreamHandle) -> Result<bool> {
        self.step("encode")?;
        Ok(true)
    }

    fn lock_bitstream(&mut self, _: BitstreamHandle) -> Result<&[u8]> {
        self.step("lock")?;
        Ok(&self.output)
    }

    fn unlock_bitstream(&mut self, _: BitstreamHandle) -> Result<()> {
        self.step("unlock")
    }

    fn unmap(&mut self, _: ResourceHandle) -> Result<()> {
        self.step("unmap")
    }

    fn flush(&mut self) -> Result<()> {
        self.step("flush")
    }

    fn destroy_bitstream(&mut self, _: BitstreamHandle) -> Result<()> {
        self.step("destroy_bitstream")
    }

    fn unregister_resource(&mut self, _: ResourceHandle) -> Result<()> {
        self.step("unregister")
    }

    fn destroy_encoder(&mut self) -> Result<()> {
        self.step("destroy_encoder")
    }

    fn destroy_capture(&mut self) -> Result<()> {
        self.step("destroy_capture")
    }

    fn close_handle(&mut self) -> Result<()> {
        self.step("close_handle")
    }
}
