//! Frame format conversion and scaling
//!
//! Converts a raw capture into the configured output with FFmpeg's
//! swscale, in two passes:
//! - packed RGB variants to planar/semi-planar YUV (or another packed
//!   order) at source size, BT.601 limited range
//! - optional rescale in the output format, nearest or area filter
//!
//! Nothing here allocates per frame. [`FrameConverter`] owns the FFmpeg
//! frames for each pass; the intermediate one exists only when both
//! conversion and scaling happen.

mod frame;
mod scale;

pub(crate) use frame::copy_in;

use ffmpeg_next::software::scaling::Flags;
use ffmpeg_next::util::frame::video::Video;
use std::borrow::Cow;
use tracing::debug;

use crate::config::ScaleFilter;
use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;
use crate::types::{FrameBuffer, FrameContent};
use scale::Stage;

/// Convert a frame in one call
///
/// Returns the input unchanged (borrowed) when format and size already
/// match; otherwise allocates the output.
#[allow(clippy::too_many_arguments)]
pub fn convert<'a>(
    src: &'a [u8],
    src_format: PixelFormat,
    src_width: u32,
    src_height: u32,
    dst_format: PixelFormat,
    dst_width: u32,
    dst_height: u32,
    filter: ScaleFilter,
) -> Result<Cow<'a, [u8]>> {
    let mut converter = FrameConverter::new(
        src_format, src_width, src_height, dst_format, dst_width, dst_height, filter,
    )?;
    converter.check_source(src)?;

    if converter.is_passthrough() {
        return Ok(Cow::Borrowed(&src[..converter.output_len()]));
    }

    let mut out = vec![0u8; converter.output_len()];
    converter.run(src, &mut out)?;
    Ok(Cow::Owned(out))
}

/// Reusable converter for a fixed source and output shape
pub struct FrameConverter {
    src_format: PixelFormat,
    src_width: u32,
    src_height: u32,
    dst_format: PixelFormat,
    dst_width: u32,
    dst_height: u32,
    filter: ScaleFilter,
    /// Size after colour conversion, before scaling
    converted: (u32, u32),
    /// Source pixels, cropped to the converted size
    input: Video,
    /// Format conversion at source size
    convert: Option<Stage>,
    /// Rescale in the output format
    rescale: Option<Stage>,
}

// SAFETY: the swscale contexts and frames are owned by this converter and
// only used through `&mut self`, never from two threads at once.
unsafe impl Send for FrameConverter {}

impl std::fmt::Debug for FrameConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConverter")
            .field("src_format", &self.src_format)
            .field("src_size", &(self.src_width, self.src_height))
            .field("dst_format", &self.dst_format)
            .field("dst_size", &(self.dst_width, self.dst_height))
            .field("filter", &self.filter)
            .field("converted", &self.converted)
            .finish()
    }
}

impl FrameConverter {
    /// Create a converter
    ///
    /// For subsampled outputs an odd source is cropped to even before
    /// conversion, so the converted size may be one pixel smaller.
    pub fn new(
        src_format: PixelFormat,
        src_width: u32,
        src_height: u32,
        dst_format: PixelFormat,
        dst_width: u32,
        dst_height: u32,
        filter: ScaleFilter,
    ) -> Result<Self> {
        if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
            return Err(CaptureError::conversion(format!(
                "cannot convert {}x{} to {}x{}",
                src_width, src_height, dst_width, dst_height
            )));
        }
        if dst_format.is_subsampled() && (dst_width % 2 != 0 || dst_height % 2 != 0) {
            return Err(CaptureError::conversion(format!(
                "{} output needs even dimensions, got {}x{}",
                dst_format, dst_width, dst_height
            )));
        }

        let converted = if src_format == dst_format {
            if src_format.is_subsampled() && (src_width % 2 != 0 || src_height % 2 != 0) {
                return Err(CaptureError::conversion(format!(
                    "{} source has odd dimensions {}x{}",
                    src_format, src_width, src_height
                )));
            }
            (src_width, src_height)
        } else if !src_format.is_packed() {
            return Err(CaptureError::conversion(format!(
                "cannot convert planar {} to {}",
                src_format, dst_format
            )));
        } else if dst_format.is_subsampled() {
            (src_width & !1, src_height & !1)
        } else {
            (src_width, src_height)
        };
        let dst_size = (dst_width, dst_height);
        let scaling = converted != dst_size;

        let convert = (src_format != dst_format)
            .then(|| Stage::new(src_format, converted, dst_format, converted, Flags::BILINEAR))
            .transpose()?;
        let rescale = scaling
            .then(|| Stage::new(dst_format, converted, dst_format, dst_size, scale::flags(filter)))
            .transpose()?;
        let input = if convert.is_none() && rescale.is_none() {
            Video::empty()
        } else {
            Video::new(frame::pixel(src_format), converted.0, converted.1)
        };

        debug!(
            "Frame converter: {} {}x{} -> {} {}x{} (scaling: {})",
            src_format, src_width, src_height, dst_format, dst_width, dst_height, scaling
        );

        Ok(Self {
            src_format,
            src_width,
            src_height,
            dst_format,
            dst_width,
            dst_height,
            filter,
            converted,
            input,
            convert,
            rescale,
        })
    }

    /// Whether output equals input byte for byte
    pub fn is_passthrough(&self) -> bool {
        self.src_format == self.dst_format && !self.needs_scaling()
    }

    /// Whether a rescale step runs
    pub fn needs_scaling(&self) -> bool {
        self.converted != (self.dst_width, self.dst_height)
    }

    /// Whether an intermediate frame sits between conversion and scaling
    pub fn has_intermediate(&self) -> bool {
        self.convert.is_some() && self.rescale.is_some()
    }

    /// Output format
    pub fn output_format(&self) -> PixelFormat {
        self.dst_format
    }

    /// Output size in pixels
    pub fn output_size(&self) -> (u32, u32) {
        (self.dst_width, self.dst_height)
    }

    /// Bytes per output frame
    pub fn output_len(&self) -> usize {
        self.dst_format.frame_len(self.dst_width, self.dst_height)
    }

    /// Bytes expected per input frame
    pub fn input_len(&self) -> usize {
        self.src_format.frame_len(self.src_width, self.src_height)
    }

    fn check_source(&self, src: &[u8]) -> Result<()> {
        if src.len() < self.input_len() {
            return Err(CaptureError::conversion(format!(
                "source buffer has {} bytes, expected {}",
                src.len(),
                self.input_len()
            )));
        }
        Ok(())
    }

    /// Convert one frame into a reused frame buffer
    pub fn convert_into(&mut self, src: &[u8], frame: &mut FrameBuffer) -> Result<()> {
        self.check_source(src)?;
        let len = self.output_len();
        self.run(src, frame.fill(len)?)?;
        frame.content = FrameContent::Raw(self.dst_format);
        frame.width = self.dst_width;
        frame.height = self.dst_height;
        Ok(())
    }

    fn run(&mut self, src: &[u8], out: &mut [u8]) -> Result<()> {
        if self.is_passthrough() {
            out.copy_from_slice(&src[..out.len()]);
            return Ok(());
        }

        frame::copy_in(src, self.src_format, self.src_width, self.src_height, &mut self.input);
        if let Some(stage) = self.convert.as_mut() {
            stage.run(&self.input)?;
        }
        let converted = self.convert.as_ref().map_or(&self.input, |stage| &stage.output);
        if let Some(stage) = self.rescale.as_mut() {
            stage.run(converted)?;
        }
        let output = self.rescale.as_ref().map_or(converted, |stage| &stage.output);
        frame::copy_out(output, self.dst_format, out);
        Ok(())
    }
}
