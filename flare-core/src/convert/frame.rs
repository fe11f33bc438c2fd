//! Moving pixels between tightly packed buffers and FFmpeg frames
//!
//! FFmpeg frames pad their rows; capture and delivery buffers do not. Both
//! copies walk the plane layout from [`PixelFormat::planes`].

use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video;

use crate::formats::PixelFormat;

/// FFmpeg pixel format with the same memory layout
pub fn pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Rgb => Pixel::RGB24,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Argb => Pixel::ARGB,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

/// Copy a `width`x`height` buffer into `frame`
///
/// The frame may be smaller than the buffer; rows and columns past the
/// frame size are cropped.
pub fn copy_in(src: &[u8], format: PixelFormat, width: u32, height: u32, frame: &mut Video) {
    let src_planes = format.planes(width, height);
    let dst_planes = format.planes(frame.width(), frame.height());

    for (index, (sp, dp)) in src_planes.iter().zip(&dst_planes).enumerate() {
        let row_len = dp.width as usize * dp.bytes_per_sample;
        let stride = frame.stride(index);
        let plane = &src[sp.offset..sp.offset + sp.len];
        for (dst_row, src_row) in frame
            .data_mut(index)
            .chunks_mut(stride)
            .zip(plane.chunks(sp.stride))
            .take(dp.height as usize)
        {
            dst_row[..row_len].copy_from_slice(&src_row[..row_len]);
        }
    }
}

/// Copy `frame` into a tightly packed buffer of its size
pub fn copy_out(frame: &Video, format: PixelFormat, out: &mut [u8]) {
    for (index, plane) in format.planes(frame.width(), frame.height()).iter().enumerate() {
        let row_len = plane.width as usize * plane.bytes_per_sample;
        let stride = frame.stride(index);
        let dst = &mut out[plane.offset..plane.offset + plane.len];
        for (dst_row, src_row) in dst
            .chunks_mut(plane.stride)
            .zip(frame.data(index).chunks(stride))
            .take(plane.height as usize)
        {
            dst_row.copy_from_slice(&src_row[..row_len]);
        }
    }
}
