//! Image-blob mask decoding.
//!
//! On-disk masks arrive as PNG or JPEG bytes. The PNG header decides the
//! route (see [`crate::png_header`]): 8-bit images are rasterized to RGBA
//! and, for grayscale sources, compacted to one channel; 16-bit PNGs go
//! through a path that keeps full sample precision.

use image::DynamicImage;

use crate::png_header::{self, Route};
use crate::types::{DecodeError, ElementType, OverlayMask};

/// Decode an image blob into an [`OverlayMask`].
///
/// # Errors
///
/// Returns [`DecodeError::EmptyInput`] if `bytes` is empty and
/// [`DecodeError::ImageDecode`] if the image cannot be decoded.
pub fn decode_mask_image(bytes: &[u8]) -> Result<OverlayMask, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    match png_header::route(bytes) {
        Route::Rasterize { channels } => rasterize(bytes, channels),
        Route::Png16 { channels } => decode_png16(bytes, channels),
    }
}

/// Decode to 8-bit RGBA, compacting to the red channel when `channels == 1`.
fn rasterize(bytes: &[u8], channels: u32) -> Result<OverlayMask, DecodeError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    let shape = [rgba.height(), rgba.width()];
    let mut buf = rgba.into_raw();
    if channels == 1 {
        compact_rgba_to_mono(&mut buf);
    }
    OverlayMask::new(buf, 0, ElementType::Uint8, shape, channels)
}

/// Recast an RGBA buffer to one byte per pixel, in place.
///
/// Byte `4 * i` (red) moves to position `i`. This is a forward-only
/// compaction: at every step the write index `i` is at most the read
/// index `4 * i`, so no unread byte is overwritten. The buffer is then
/// truncated to one quarter of its length.
pub fn compact_rgba_to_mono(buf: &mut Vec<u8>) {
    let pixels = buf.len() / 4;
    for i in 0..pixels {
        buf[i] = buf[4 * i];
    }
    buf.truncate(pixels);
}

/// Decode a 16-bit PNG preserving full precision.
fn decode_png16(bytes: &[u8], channels: u32) -> Result<OverlayMask, DecodeError> {
    let img = image::load_from_memory(bytes)?;
    let shape = [img.height(), img.width()];
    let samples: Vec<u16> = if channels == 1 {
        luma16(img).into_raw()
    } else {
        img.to_rgba16().into_raw()
    };
    let buf = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    OverlayMask::new(buf, 0, ElementType::Uint16, shape, channels)
}

fn luma16(img: DynamicImage) -> image::ImageBuffer<image::Luma<u16>, Vec<u16>> {
    match img {
        DynamicImage::ImageLuma16(buf) => buf,
        other => other.to_luma16(),
    }
}
