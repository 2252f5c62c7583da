//! PNG header sniffing.
//!
//! Reads just enough of an image blob to decide how it should be
//! decoded: the 8-byte signature followed by the IHDR chunk, whose bit
//! depth and color type sit at fixed offsets.
//!
//! ```text
//! 0        8      12     16      20       24   25
//! signature length "IHDR" width  height   depth color-type
//! ```

/// The eight bytes every PNG stream starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Number of leading bytes needed to read the IHDR fields of interest.
pub const SNIFF_LEN: usize = 26;

const IHDR_TAG_OFFSET: usize = 12;
const BIT_DEPTH_OFFSET: usize = 24;
const COLOR_TYPE_OFFSET: usize = 25;

/// PNG color type values from the IHDR chunk.
pub mod color_type {
    pub const GRAYSCALE: u8 = 0;
    pub const TRUECOLOR: u8 = 2;
    pub const INDEXED: u8 = 3;
    pub const GRAYSCALE_ALPHA: u8 = 4;
    pub const TRUECOLOR_ALPHA: u8 = 6;
}

/// The IHDR fields that drive decoder routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngHeader {
    /// Bits per sample (or per palette index).
    pub bit_depth: u8,
    /// Raw IHDR color type.
    pub color_type: u8,
}

impl PngHeader {
    /// Logical channel count used for the decoded mask.
    ///
    /// Grayscale and grayscale+alpha images carry one logical channel;
    /// everything else (indexed, truecolor, RGBA) is treated as four.
    #[must_use]
    pub const fn logical_channels(self) -> u32 {
        match self.color_type {
            color_type::GRAYSCALE | color_type::GRAYSCALE_ALPHA => 1,
            _ => 4,
        }
    }

    /// Returns `true` for palette-based images.
    #[must_use]
    pub const fn is_indexed(self) -> bool {
        self.color_type == color_type::INDEXED
    }
}

/// How an image blob should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Generic 8-bit rasterization to RGBA, optionally compacted to
    /// `channels == 1`.
    Rasterize { channels: u32 },
    /// 16-bit PNG path that preserves full sample precision.
    Png16 { channels: u32 },
}

/// Read the IHDR fields from the start of `bytes`.
///
/// Returns `None` if the signature is missing, the stream is too short,
/// or the first chunk is not IHDR.
#[must_use]
pub fn sniff(bytes: &[u8]) -> Option<PngHeader> {
    if bytes.len() < SNIFF_LEN || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return None;
    }
    if &bytes[IHDR_TAG_OFFSET..IHDR_TAG_OFFSET + 4] != b"IHDR" {
        return None;
    }
    Some(PngHeader {
        bit_depth: bytes[BIT_DEPTH_OFFSET],
        color_type: bytes[COLOR_TYPE_OFFSET],
    })
}

/// Pick the decoder for an image blob.
///
/// Anything that is not a PNG (e.g. JPEG) defaults to four channels.
#[must_use]
pub fn route(bytes: &[u8]) -> Route {
    match sniff(bytes) {
        None => Route::Rasterize { channels: 4 },
        Some(header) if header.bit_depth == 16 => Route::Png16 {
            channels: header.logical_channels(),
        },
        Some(header) => Route::Rasterize {
            channels: header.logical_channels(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build the first 26 bytes of a PNG with the given IHDR fields.
    fn header_bytes(bit_depth: u8, color_type: u8) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.push(bit_depth);
        bytes.push(color_type);
        bytes
    }

    #[test]
    fn non_png_defaults_to_four_channels() {
        assert_eq!(route(&[0xFF, 0xD8, 0xFF, 0xE0]), Route::Rasterize { channels: 4 });
        assert_eq!(route(&[0; 40]), Route::Rasterize { channels: 4 });
    }

    #[test]
    fn truncated_png_is_not_sniffed() {
        let bytes = header_bytes(8, 0);
        assert!(sniff(&bytes[..20]).is_none());
    }

    #[test]
    fn grayscale_color_types_select_one_channel() {
        for depth in [1, 2, 4, 8] {
            for ct in [color_type::GRAYSCALE, color_type::GRAYSCALE_ALPHA] {
                assert_eq!(
                    route(&header_bytes(depth, ct)),
                    Route::Rasterize { channels: 1 },
                    "depth {depth} color type {ct}"
                );
            }
        }
    }

    #[test]
    fn other_color_types_select_four_channels() {
        for depth in [1, 2, 4, 8] {
            for ct in [
                color_type::TRUECOLOR,
                color_type::INDEXED,
                color_type::TRUECOLOR_ALPHA,
            ] {
                assert_eq!(
                    route(&header_bytes(depth, ct)),
                    Route::Rasterize { channels: 4 },
                    "depth {depth} color type {ct}"
                );
            }
        }
    }

    #[test]
    fn sixteen_bit_routes_to_png16() {
        assert_eq!(
            route(&header_bytes(16, color_type::GRAYSCALE)),
            Route::Png16 { channels: 1 }
        );
        assert_eq!(
            route(&header_bytes(16, color_type::TRUECOLOR_ALPHA)),
            Route::Png16 { channels: 4 }
        );
    }

    #[test]
    fn indexed_header_is_detected() {
        let header = sniff(&header_bytes(4, color_type::INDEXED));
        assert_eq!(
            header,
            Some(PngHeader {
                bit_depth: 4,
                color_type: color_type::INDEXED
            })
        );
        assert!(header.is_some_and(PngHeader::is_indexed));
    }
}
