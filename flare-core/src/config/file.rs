//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/flare/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{BackendKind, CaptureConfig, Codec, EncoderPreset, Preset, ScaleFilter};
use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture settings
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Encoder settings
    #[serde(default)]
    pub encoder: EncoderSettings,

    /// Output settings
    #[serde(default)]
    pub output: OutputSettings,
}

/// Default capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Output preset (e.g. "1080p60"); empty means use width/height/fps below
    #[serde(default)]
    pub preset: String,

    /// Output width (0 = native)
    #[serde(default)]
    pub width: u32,

    /// Output height (0 = native)
    #[serde(default)]
    pub height: u32,

    /// Frames per second (0 = uncapped)
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Scaling filter (nearest, box)
    #[serde(default = "default_scale_filter")]
    pub scale_filter: String,

    /// Backend (auto, software, hardware)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Source to select on load (empty = first)
    #[serde(default)]
    pub source: String,
}

/// Encoder-specific settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Codec (h264, hevc, av1)
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Encoder quality preset (fast, medium, slow, quality)
    #[serde(default = "default_quality")]
    pub quality: String,

    /// Bitrate in kbps (0 = auto)
    #[serde(default)]
    pub bitrate: u32,
}

/// Output and bookkeeping settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory recordings are written to (empty = data dir)
    #[serde(default)]
    pub directory: String,

    /// Append session history records
    #[serde(default = "default_true")]
    pub history: bool,
}

// Default value functions
fn default_fps() -> u32 {
    60
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_scale_filter() -> String {
    "nearest".to_string()
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_codec() -> String {
    "h264".to_string()
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            preset: String::new(),
            width: 0,
            height: 0,
            fps: default_fps(),
            pixel_format: default_pixel_format(),
            scale_filter: default_scale_filter(),
            backend: default_backend(),
            source: String::new(),
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            quality: default_quality(),
            bitrate: 0,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: String::new(),
            history: true,
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("flare").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("flare")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/flare/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Source name to select on load, if any
    pub fn source(&self) -> Option<&str> {
        let name = self.capture.source.trim();
        (!name.is_empty()).then_some(name)
    }

    /// Directory recordings go to
    pub fn output_dir(&self) -> PathBuf {
        if !self.output.directory.is_empty() {
            return PathBuf::from(&self.output.directory);
        }
        dirs::video_dir()
            .or_else(dirs::data_dir)
            .map(|dir| dir.join("flare"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Build a capture configuration from the file contents
    pub fn to_capture_config(&self) -> Result<CaptureConfig> {
        let parse = |what: &str, value: &str| {
            CaptureError::config(format!("Invalid {} '{}' in config file", what, value))
        };

        let mut config = CaptureConfig::native()
            .with_resolution(self.capture.width, self.capture.height)
            .with_refresh_rate(self.capture.fps);

        if !self.capture.preset.is_empty() {
            let preset: Preset = self
                .capture
                .preset
                .parse()
                .map_err(|_| parse("preset", &self.capture.preset))?;
            config = config.with_preset(preset);
        }

        let pixel_format: PixelFormat = self
            .capture
            .pixel_format
            .parse()
            .map_err(|_| parse("pixel_format", &self.capture.pixel_format))?;
        let scale_filter: ScaleFilter = self
            .capture
            .scale_filter
            .parse()
            .map_err(|_| parse("scale_filter", &self.capture.scale_filter))?;
        let backend: BackendKind = self
            .capture
            .backend
            .parse()
            .map_err(|_| parse("backend", &self.capture.backend))?;
        let codec: Codec = self
            .encoder
            .codec
            .parse()
            .map_err(|_| parse("codec", &self.encoder.codec))?;
        let quality: EncoderPreset = self
            .encoder
            .quality
            .parse()
            .map_err(|_| parse("quality", &self.encoder.quality))?;

        let config = config
            .with_pixel_format(pixel_format)
            .with_scale_filter(scale_filter)
            .with_backend(backend)
            .with_codec(codec)
            .with_encoder_preset(quality)
            .with_bitrate(self.encoder.bitrate);

        config.validate()?;
        Ok(config)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# Flare Configuration

[capture]
# Output preset: 720p30, 720p60, 1080p30, 1080p60, 1440p60, 4k30, 4k60
# Leave empty to use width/height/fps below
preset = ""

# Output size in pixels (0 = native source size)
width = 0
height = 0

# Frames per second (0 = uncapped)
fps = 60

# Pixel format for raw capture: rgb, rgba, argb, bgra, yuv420p, yuv444p, nv12
pixel_format = "yuv420p"

# Scaling filter when resizing: nearest, box
scale_filter = "nearest"

# Backend: auto, software, hardware
backend = "auto"

# Source to capture (see 'flare list'); empty = first source
source = ""

[encoder]
# Codec for the hardware backend: h264, hevc, av1
codec = "h264"

# Quality preset: fast, medium, slow, quality
quality = "medium"

# Bitrate in kbps (0 = automatic based on resolution)
bitrate = 0

[output]
# Directory for recordings (empty = ~/Videos/flare)
directory = ""

# Keep a session history log
history = true
"#
    .to_string()
}
