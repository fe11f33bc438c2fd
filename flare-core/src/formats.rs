//! Pixel format definitions and buffer layout
//!
//! Centralizes pixel format handling so buffer sizes and plane offsets are
//! computed in one place. All byte orders are memory order: `Bgra` means the
//! first byte of each pixel is blue, which is what a 32-bpp little-endian X
//! server hands back in Z-pixmap format.

use serde::{Deserialize, Serialize};

/// Pixel format of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 24-bit R, G, B
    Rgb,
    /// Packed 32-bit R, G, B, A
    Rgba,
    /// Packed 32-bit A, R, G, B
    Argb,
    /// Packed 32-bit B, G, R, A
    Bgra,
    /// Planar Y, U, V with 2x2 chroma subsampling
    #[default]
    Yuv420p,
    /// Planar Y, U, V without chroma subsampling
    Yuv444p,
    /// Y plane followed by interleaved UV at 2x2 subsampling
    Nv12,
}

/// Byte offsets of each channel inside one packed pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub r: usize,
    pub g: usize,
    pub b: usize,
    pub a: Option<usize>,
}

/// One plane of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    /// Byte offset of the plane from the start of the buffer
    pub offset: usize,
    /// Length of the plane in bytes
    pub len: usize,
    /// Bytes per row
    pub stride: usize,
    /// Plane width in samples
    pub width: u32,
    /// Plane height in rows
    pub height: u32,
    /// Bytes per sample
    pub bytes_per_sample: usize,
}

impl PixelFormat {
    /// All supported formats
    pub const ALL: [PixelFormat; 7] = [
        Self::Rgb,
        Self::Rgba,
        Self::Argb,
        Self::Bgra,
        Self::Yuv420p,
        Self::Yuv444p,
        Self::Nv12,
    ];

    /// Whether all channels of a pixel are stored together
    pub fn is_packed(&self) -> bool {
        matches!(self, Self::Rgb | Self::Rgba | Self::Argb | Self::Bgra)
    }

    /// Whether chroma is subsampled 2x2 (dimensions must be even)
    pub fn is_subsampled(&self) -> bool {
        matches!(self, Self::Yuv420p | Self::Nv12)
    }

    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Rgb => Some(3),
            Self::Rgba | Self::Argb | Self::Bgra => Some(4),
            _ => None,
        }
    }

    /// Channel offsets for packed formats
    pub fn channels(&self) -> Option<ChannelLayout> {
        match self {
            Self::Rgb => Some(ChannelLayout { r: 0, g: 1, b: 2, a: None }),
            Self::Rgba => Some(ChannelLayout { r: 0, g: 1, b: 2, a: Some(3) }),
            Self::Argb => Some(ChannelLayout { r: 1, g: 2, b: 3, a: Some(0) }),
            Self::Bgra => Some(ChannelLayout { r: 2, g: 1, b: 0, a: Some(3) }),
            _ => None,
        }
    }

    /// Size in bytes of a tightly packed frame
    ///
    /// 4:2:0 formats use `width * height * 3 / 2`, 4:4:4 uses
    /// `width * height * 3`.
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Yuv420p | Self::Nv12 => pixels * 3 / 2,
            Self::Yuv444p => pixels * 3,
            packed => pixels * packed.bytes_per_pixel().unwrap_or(4),
        }
    }

    /// Plane layout of a tightly packed frame
    pub fn planes(&self, width: u32, height: u32) -> Vec<Plane> {
        let w = width as usize;
        let h = height as usize;
        let plane = |offset: usize, width: u32, height: u32, bps: usize| Plane {
            offset,
            len: width as usize * height as usize * bps,
            stride: width as usize * bps,
            width,
            height,
            bytes_per_sample: bps,
        };

        match self {
            Self::Yuv420p => {
                let (cw, ch) = (width / 2, height / 2);
                let luma = w * h;
                let chroma = cw as usize * ch as usize;
                vec![
                    plane(0, width, height, 1),
                    plane(luma, cw, ch, 1),
                    plane(luma + chroma, cw, ch, 1),
                ]
            }
            Self::Yuv444p => {
                let luma = w * h;
                vec![
                    plane(0, width, height, 1),
                    plane(luma, width, height, 1),
                    plane(luma * 2, width, height, 1),
                ]
            }
            Self::Nv12 => vec![
                plane(0, width, height, 1),
                plane(w * h, width / 2, height / 2, 2),
            ],
            packed => vec![plane(0, width, height, packed.bytes_per_pixel().unwrap_or(4))],
        }
    }

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Rgba => "rgba",
            Self::Argb => "argb",
            Self::Bgra => "bgra",
            Self::Yuv420p => "yuv420p",
            Self::Yuv444p => "yuv444p",
            Self::Nv12 => "nv12",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rgb" | "rgb24" => Ok(Self::Rgb),
            "rgba" => Ok(Self::Rgba),
            "argb" => Ok(Self::Argb),
            "bgra" | "bgrx" => Ok(Self::Bgra),
            "yuv420p" | "i420" => Ok(Self::Yuv420p),
            "yuv444p" | "i444" => Ok(Self::Yuv444p),
            "nv12" => Ok(Self::Nv12),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Format for a pixel depth reported by the X server
///
/// Only 24/32-bit TrueColor visuals are supported; both come back as four
/// bytes per pixel in blue, green, red, pad order.
pub fn from_x11_depth(depth: u8) -> Option<PixelFormat> {
    match depth {
        24 | 32 => Some(PixelFormat::Bgra),
        _ => None,
    }
}
