//! Indexed (palette) PNG decoding.
//!
//! Generic rasterization expands palettes on its own, so this path is
//! only taken when the caller explicitly wants palette colors as RGB
//! category keys. The `png` codec runs with no transformations, which
//! leaves the packed index plane and the PLTE chunk untouched; the
//! indices are then expanded through [`unpack_indexed`].

use std::io::Cursor;

use crate::types::{DecodeError, ElementType, OverlayMask};

/// Expand sub-byte packed palette indices into RGB triples.
///
/// Each input byte yields `8 / bit_depth` indices, most significant
/// bits first. The output is exactly
/// `data.len() * 8 / bit_depth * 3` bytes long.
///
/// # Errors
///
/// Returns [`DecodeError::UnsupportedBitDepth`] unless `bit_depth` is
/// 1, 2, 4 or 8, and [`DecodeError::PaletteIndexOutOfRange`] for an
/// index with no palette entry.
pub fn unpack_indexed(
    data: &[u8],
    bit_depth: u8,
    palette: &[[u8; 3]],
) -> Result<Vec<u8>, DecodeError> {
    if !matches!(bit_depth, 1 | 2 | 4 | 8) {
        return Err(DecodeError::UnsupportedBitDepth(bit_depth));
    }

    #[expect(clippy::cast_possible_truncation)]
    let index_mask = ((1u16 << bit_depth) - 1) as u8;
    let per_byte = 8 / usize::from(bit_depth);
    let mut out = Vec::with_capacity(data.len() * per_byte * 3);

    for &byte in data {
        let mut remaining = 8u8;
        while remaining >= bit_depth {
            remaining -= bit_depth;
            let index = (byte >> remaining) & index_mask;
            let rgb = palette
                .get(usize::from(index))
                .ok_or(DecodeError::PaletteIndexOutOfRange {
                    index,
                    palette_len: palette.len(),
                })?;
            out.extend_from_slice(rgb);
        }
    }
    Ok(out)
}

fn malformed(err: png::DecodingError) -> DecodeError {
    DecodeError::MalformedPng(err.to_string())
}

/// Decode an indexed PNG into a 3-channel `Uint8` mask of palette RGB.
///
/// Adam7-interlaced images are de-interlaced by the codec before the
/// index plane is unpacked.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedPng`] if the stream is not an indexed
/// PNG, has no palette, or fails the codec's chunk and CRC checks, and
/// any error from [`unpack_indexed`].
pub fn decode_indexed_png(bytes: &[u8]) -> Result<OverlayMask, DecodeError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(malformed)?;

    let info = reader.info();
    if info.color_type != png::ColorType::Indexed {
        return Err(DecodeError::MalformedPng(format!(
            "color type {:?} is not indexed",
            info.color_type
        )));
    }
    let palette: Vec<[u8; 3]> = info
        .palette
        .as_deref()
        .ok_or_else(|| DecodeError::MalformedPng("indexed PNG without PLTE".into()))?
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf).map_err(malformed)?;
    let bit_depth = frame.bit_depth as u8;
    let width = frame.width as usize;
    let height = frame.height as usize;

    let mut out = Vec::with_capacity(width * height * 3);
    for row in buf[..frame.buffer_size()]
        .chunks_exact(frame.line_size)
        .take(height)
    {
        let mut rgb = unpack_indexed(row, bit_depth, &palette)?;
        // Trailing bits of the last byte are padding, not pixels.
        rgb.truncate(width * 3);
        out.extend_from_slice(&rgb);
    }

    OverlayMask::new(out, 0, ElementType::Uint8, [frame.height, frame.width], 3)
}
