//! Core types for Flare
//!
//! These types represent the fundamental data structures used throughout
//! the capture pipeline.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::Codec;
use crate::formats::{PixelFormat, Plane};

/// Opaque platform handle for a capture source
///
/// For X11 this is a window id (or the root window for monitors); for other
/// providers it is whatever the provider chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceHandle(u64);

impl SourceHandle {
    /// Wrap a raw platform handle
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Kind of capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Full monitor/display capture
    Monitor,
    /// Individual window capture
    Window,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Monitor => write!(f, "Monitor"),
            SourceKind::Window => write!(f, "Window"),
        }
    }
}

/// Position and size of a source in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Create a geometry
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the geometry covers any pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A screen or window the platform can capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSource {
    /// Human-readable, catalog-unique name
    pub name: String,
    /// Platform handle
    pub handle: SourceHandle,
    /// What kind of source this is
    pub kind: SourceKind,
    /// Position and native size
    pub geometry: Geometry,
}

impl CaptureSource {
    /// Create a monitor source
    pub fn monitor(name: impl Into<String>, handle: SourceHandle, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            handle,
            kind: SourceKind::Monitor,
            geometry,
        }
    }

    /// Create a window source
    pub fn window(name: impl Into<String>, handle: SourceHandle, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            handle,
            kind: SourceKind::Window,
            geometry,
        }
    }
}

impl std::fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.kind, self.geometry)
    }
}

/// What a frame buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContent {
    /// Raw pixels in the given format
    Raw(PixelFormat),
    /// Encoded bitstream for the given codec
    Encoded(Codec),
}

/// Size and content of the frames a backend will produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Raw pixels or encoded bitstream
    pub content: FrameContent,
    /// Largest frame the backend can produce, in bytes
    pub capacity: usize,
}

impl FrameSpec {
    /// Spec for raw frames of a given format, sized exactly
    pub fn raw(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            content: FrameContent::Raw(format),
            capacity: format.frame_len(width, height),
        }
    }
}

/// One captured frame
///
/// The storage is allocated once per capture from a [`FrameSpec`] and reused
/// for every iteration; `len` marks how much of it holds the current frame.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    len: usize,
    /// Raw pixels or encoded bitstream
    pub content: FrameContent,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Acquisition order, starting at 0 for each capture
    pub sequence: u64,
    /// When the source pixels were grabbed
    pub captured_at: Instant,
}

impl FrameBuffer {
    /// Allocate a buffer able to hold any frame described by `spec`
    pub fn with_spec(spec: FrameSpec) -> Self {
        Self {
            data: vec![0u8; spec.capacity],
            len: 0,
            content: spec.content,
            width: spec.width,
            height: spec.height,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    /// The valid bytes of the current frame
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no frame data
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Mutable view of `len` bytes for a producer to fill
    ///
    /// Fails if `len` exceeds the capacity fixed at allocation; the buffer
    /// never grows inside the capture loop.
    pub fn fill(&mut self, len: usize) -> crate::Result<&mut [u8]> {
        if len > self.data.len() {
            return Err(crate::CaptureError::acquisition(format!(
                "frame of {} bytes exceeds buffer capacity {}",
                len,
                self.data.len()
            )));
        }
        self.len = len;
        Ok(&mut self.data[..len])
    }

    /// Copy `bytes` in as the current frame
    pub fn write(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.fill(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Plane layout of the current frame (raw frames only)
    pub fn planes(&self) -> Vec<Plane> {
        match self.content {
            FrameContent::Raw(format) => format.planes(self.width, self.height),
            FrameContent::Encoded(_) => Vec::new(),
        }
    }

    /// Bytes of one plane of the current frame
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let plane = *self.planes().get(index)?;
        self.as_slice().get(plane.offset..plane.offset + plane.len)
    }
}
