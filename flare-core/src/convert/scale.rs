//! FFmpeg scaling contexts

use ffmpeg_next::software::scaling::{self, Flags};
use ffmpeg_next::util::frame::video::Video;
use tracing::debug;

use super::frame::pixel;
use crate::config::ScaleFilter;
use crate::error::{CaptureError, Result};
use crate::formats::PixelFormat;

/// FFmpeg filter for a configured scale filter
pub fn flags(filter: ScaleFilter) -> Flags {
    match filter {
        ScaleFilter::Nearest => Flags::POINT,
        ScaleFilter::Box => Flags::AREA,
    }
}

/// One swscale pass with its preallocated output
pub struct Stage {
    context: scaling::Context,
    pub output: Video,
}

impl Stage {
    /// Create a pass from one format and size to another
    pub fn new(
        src_format: PixelFormat,
        src_size: (u32, u32),
        dst_format: PixelFormat,
        dst_size: (u32, u32),
        flags: Flags,
    ) -> Result<Self> {
        debug!(
            "Creating scaler: {} {}x{} -> {} {}x{}",
            src_format, src_size.0, src_size.1, dst_format, dst_size.0, dst_size.1
        );

        let context = scaling::Context::get(
            pixel(src_format),
            src_size.0,
            src_size.1,
            pixel(dst_format),
            dst_size.0,
            dst_size.1,
            flags,
        )
        .map_err(|e| CaptureError::conversion(format!("Failed to create scaler: {}", e)))?;

        Ok(Self {
            context,
            output: Video::new(pixel(dst_format), dst_size.0, dst_size.1),
        })
    }

    /// Run the pass into `output`
    pub fn run(&mut self, input: &Video) -> Result<()> {
        self.context
            .run(input, &mut self.output)
            .map_err(|e| CaptureError::conversion(format!("Scaling failed: {}", e)))
    }
}
