//! Configuration types for Flare
//!
//! Provides the capture configuration, output presets and encoder settings.

mod file;

pub use file::{sample_config, ConfigFile};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;

/// Largest supported output width
pub const MAX_WIDTH: u32 = 7680;
/// Largest supported output height
pub const MAX_HEIGHT: u32 = 4320;
/// Largest supported refresh rate
pub const MAX_REFRESH_RATE: u32 = 240;

/// Video codec for hardware encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 / AVC (most compatible)
    #[default]
    H264,
    /// H.265 / HEVC (better compression)
    Hevc,
    /// AV1 (best compression, newer GPUs only)
    Av1,
}

impl Codec {
    /// All codecs
    pub const ALL: [Codec; 3] = [Self::H264, Self::Hevc, Self::Av1];

    /// Get the FFmpeg encoder name for NVENC
    pub fn nvenc_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "h264_nvenc",
            Self::Hevc => "hevc_nvenc",
            Self::Av1 => "av1_nvenc",
        }
    }

    /// Get the codec name for display
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::Hevc => "HEVC",
            Self::Av1 => "AV1",
        }
    }

    /// File extension for a raw elementary stream
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Av1 => "obu",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "avc" | "264" => Ok(Self::H264),
            "hevc" | "h265" | "265" => Ok(Self::Hevc),
            "av1" => Ok(Self::Av1),
            _ => Err(format!("Unknown codec: {}", s)),
        }
    }
}

/// Encoder quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    /// Fast encoding, lower quality
    Fast,
    /// Balanced encoding (default)
    #[default]
    Medium,
    /// Slower encoding, better quality
    Slow,
    /// Best quality, slowest encoding
    Quality,
}

impl EncoderPreset {
    /// Get NVENC preset name
    pub fn nvenc_preset(&self) -> &'static str {
        match self {
            Self::Fast => "p1",
            Self::Medium => "p4",
            Self::Slow => "p6",
            Self::Quality => "p7",
        }
    }
}

impl std::str::FromStr for EncoderPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "medium" => Ok(Self::Medium),
            "slow" => Ok(Self::Slow),
            "quality" => Ok(Self::Quality),
            _ => Err(format!("Unknown encoder preset: {}", s)),
        }
    }
}

/// Scaling filter used when the output size differs from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFilter {
    /// Nearest neighbour, cheapest
    #[default]
    Nearest,
    /// Area average over the covered source pixels
    Box,
}

impl std::str::FromStr for ScaleFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" | "none" | "point" => Ok(Self::Nearest),
            "box" | "area" => Ok(Self::Box),
            _ => Err(format!("Unknown scale filter: {}", s)),
        }
    }
}

/// Which capture backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Detect at runtime, preferring hardware
    #[default]
    Auto,
    /// Shared-memory grab plus CPU conversion
    Software,
    /// GPU capture and encode
    Hardware,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Software => write!(f, "software"),
            Self::Hardware => write!(f, "hardware"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "software" | "sw" | "shm" => Ok(Self::Software),
            "hardware" | "hw" | "nvenc" => Ok(Self::Hardware),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Output resolution/framerate preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Preset {
    /// 1280x720 @ 30fps
    #[serde(rename = "720p30")]
    P720_30,
    /// 1280x720 @ 60fps
    #[serde(rename = "720p60")]
    P720_60,
    /// 1920x1080 @ 30fps
    #[serde(rename = "1080p30")]
    P1080_30,
    /// 1920x1080 @ 60fps (default)
    #[default]
    #[serde(rename = "1080p60")]
    P1080_60,
    /// 2560x1440 @ 60fps
    #[serde(rename = "1440p60")]
    P1440_60,
    /// 3840x2160 @ 30fps
    #[serde(rename = "4k30")]
    P4K_30,
    /// 3840x2160 @ 60fps
    #[serde(rename = "4k60")]
    P4K_60,
}

impl Preset {
    /// Get resolution as (width, height) tuple
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            Self::P720_30 | Self::P720_60 => (1280, 720),
            Self::P1080_30 | Self::P1080_60 => (1920, 1080),
            Self::P1440_60 => (2560, 1440),
            Self::P4K_30 | Self::P4K_60 => (3840, 2160),
        }
    }

    /// Get framerate
    pub fn fps(&self) -> u32 {
        match self {
            Self::P720_30 | Self::P1080_30 | Self::P4K_30 => 30,
            Self::P720_60 | Self::P1080_60 | Self::P1440_60 | Self::P4K_60 => 60,
        }
    }

    /// Get suggested bitrate in kbps
    pub fn suggested_bitrate(&self) -> u32 {
        match self {
            Self::P720_30 => 2500,
            Self::P720_60 => 4000,
            Self::P1080_30 => 4500,
            Self::P1080_60 => 6000,
            Self::P1440_60 => 12000,
            Self::P4K_30 => 20000,
            Self::P4K_60 => 35000,
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P720_30 => write!(f, "720p30"),
            Self::P720_60 => write!(f, "720p60"),
            Self::P1080_30 => write!(f, "1080p30"),
            Self::P1080_60 => write!(f, "1080p60"),
            Self::P1440_60 => write!(f, "1440p60"),
            Self::P4K_30 => write!(f, "4K30"),
            Self::P4K_60 => write!(f, "4K60"),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "720p30" => Ok(Self::P720_30),
            "720p60" => Ok(Self::P720_60),
            "1080p30" => Ok(Self::P1080_30),
            "1080p60" => Ok(Self::P1080_60),
            "1440p60" | "2k60" => Ok(Self::P1440_60),
            "4k30" | "2160p30" => Ok(Self::P4K_30),
            "4k60" | "2160p60" => Ok(Self::P4K_60),
            _ => Err(format!("Unknown preset: {}", s)),
        }
    }
}

/// Complete capture configuration
///
/// A zero target size means "native" (the source geometry), a zero refresh
/// rate means uncapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Output width in pixels (0 = native)
    pub target_width: u32,
    /// Output height in pixels (0 = native)
    pub target_height: u32,
    /// Frames per second (0 = uncapped)
    pub refresh_rate: u32,
    /// Output pixel format (software path)
    pub pixel_format: PixelFormat,
    /// Filter used when rescaling
    pub scale_filter: ScaleFilter,
    /// Backend selection
    pub backend: BackendKind,
    /// Codec (hardware path)
    pub codec: Codec,
    /// Encoder quality preset (hardware path)
    pub encoder_preset: EncoderPreset,
    /// Bitrate in kbps (0 = derived from resolution and refresh rate)
    pub bitrate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_width: 0,
            target_height: 0,
            refresh_rate: 60,
            pixel_format: PixelFormat::Yuv420p,
            scale_filter: ScaleFilter::default(),
            backend: BackendKind::default(),
            codec: Codec::default(),
            encoder_preset: EncoderPreset::default(),
            bitrate: 0,
        }
    }
}

impl CaptureConfig {
    /// Create a config capturing at native size
    pub fn native() -> Self {
        Self::default()
    }

    /// Set the output resolution (0, 0 = native)
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    /// Set the refresh rate (0 = uncapped)
    pub fn with_refresh_rate(mut self, fps: u32) -> Self {
        self.refresh_rate = fps;
        self
    }

    /// Set resolution and refresh rate from a preset
    pub fn with_preset(self, preset: Preset) -> Self {
        let (width, height) = preset.resolution();
        self.with_resolution(width, height)
            .with_refresh_rate(preset.fps())
    }

    /// Set the output pixel format
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the scaling filter
    pub fn with_scale_filter(mut self, filter: ScaleFilter) -> Self {
        self.scale_filter = filter;
        self
    }

    /// Set the backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the encoder quality preset
    pub fn with_encoder_preset(mut self, preset: EncoderPreset) -> Self {
        self.encoder_preset = preset;
        self
    }

    /// Set the bitrate in kbps
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Whether the output keeps the source size
    pub fn is_native(&self) -> bool {
        self.target_width == 0 && self.target_height == 0
    }

    /// Target interval between frames, `None` when uncapped
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.refresh_rate > 0).then(|| Duration::from_secs(1) / self.refresh_rate)
    }

    /// Output size for a source of the given size
    ///
    /// Subsampled formats need even dimensions, so an odd native size is
    /// rounded down by one pixel.
    pub fn output_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let (width, height) = if self.is_native() {
            (source_width, source_height)
        } else {
            (self.target_width, self.target_height)
        };
        if self.pixel_format.is_subsampled() {
            (width & !1, height & !1)
        } else {
            (width, height)
        }
    }

    /// Bitrate in kbps, derived from pixels per second when unset
    pub fn effective_bitrate(&self, width: u32, height: u32) -> u32 {
        if self.bitrate > 0 {
            return self.bitrate;
        }
        let fps = if self.refresh_rate > 0 { self.refresh_rate } else { 60 };
        let pixels_per_second = width as u64 * height as u64 * fps as u64;
        // Roughly 0.05 bits per pixel, floored for tiny windows
        ((pixels_per_second * 5 / 100_000) as u32).max(1000)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if (self.target_width == 0) != (self.target_height == 0) {
            return Err(CaptureError::config(format!(
                "Target resolution {}x{} must set both dimensions or neither",
                self.target_width, self.target_height
            )));
        }

        if self.target_width > MAX_WIDTH || self.target_height > MAX_HEIGHT {
            return Err(CaptureError::config(format!(
                "Resolution {}x{} exceeds maximum supported ({}x{})",
                self.target_width, self.target_height, MAX_WIDTH, MAX_HEIGHT
            )));
        }

        if self.pixel_format.is_subsampled()
            && (self.target_width % 2 != 0 || self.target_height % 2 != 0)
        {
            return Err(CaptureError::config(format!(
                "{} needs even dimensions, got {}x{}",
                self.pixel_format, self.target_width, self.target_height
            )));
        }

        if self.refresh_rate > MAX_REFRESH_RATE {
            return Err(CaptureError::config(format!(
                "Refresh rate {} exceeds maximum supported ({})",
                self.refresh_rate, MAX_REFRESH_RATE
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_native_60() {
        let config = CaptureConfig::default();
        assert!(config.is_native());
        assert_eq!(config.refresh_rate, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_half_zero_target_rejected() {
        let config = CaptureConfig::native().with_resolution(1280, 0);
        assert!(matches!(config.validate(), Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_odd_target_rejected_for_420() {
        let config = CaptureConfig::native().with_resolution(1281, 720);
        assert!(config.validate().is_err());

        let packed = config.with_pixel_format(PixelFormat::Bgra);
        assert!(packed.validate().is_ok());
    }

    #[test]
    fn test_limits() {
        assert!(CaptureConfig::native().with_resolution(8192, 4320).validate().is_err());
        assert!(CaptureConfig::native().with_refresh_rate(500).validate().is_err());
    }

    #[test]
    fn test_output_size_rounds_odd_native() {
        let config = CaptureConfig::native();
        assert_eq!(config.output_size(1921, 1081), (1920, 1080));
        let packed = config.with_pixel_format(PixelFormat::Rgba);
        assert_eq!(packed.output_size(1921, 1081), (1921, 1081));
    }

    #[test]
    fn test_frame_interval() {
        let config = CaptureConfig::native().with_refresh_rate(60);
        let interval = config.frame_interval().unwrap();
        assert!((interval.as_secs_f64() * 1000.0 - 16.667).abs() < 0.01);
        assert!(config.with_refresh_rate(0).frame_interval().is_none());
    }

    #[test]
    fn test_preset_sets_size_and_rate() {
        let config = CaptureConfig::native().with_preset(Preset::P720_30);
        assert_eq!((config.target_width, config.target_height), (1280, 720));
        assert_eq!(config.refresh_rate, 30);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("hevc".parse::<Codec>().unwrap(), Codec::Hevc);
        assert_eq!("box".parse::<ScaleFilter>().unwrap(), ScaleFilter::Box);
        assert_eq!("hw".parse::<BackendKind>().unwrap(), BackendKind::Hardware);
        assert_eq!("slow".parse::<EncoderPreset>().unwrap(), EncoderPreset::Slow);
        assert!("1440p120".parse::<Preset>().is_err());
    }
}
