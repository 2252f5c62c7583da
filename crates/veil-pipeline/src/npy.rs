//! NPY payload deserialization.
//!
//! Inline masks arrive as base64 text wrapping a zlib-compressed NPY v1
//! file. Decoding is three steps: base64-decode, inflate, then parse the
//! NPY framing:
//!
//! ```text
//! 0      6  7  8        10                10+len
//! \x93NUMPY  maj min hlen  {'descr': ..., } data...
//! ```
//!
//! The header is a Python dict literal which is rewritten into JSON
//! before parsing. Only row-major (C-order) arrays are accepted.
//!
//! # 64-bit integers
//!
//! `<u8` and `<i8` arrays are narrowed to 32 bits by keeping the low
//! word of every element and dropping the high word. This is lossy for
//! values that do not fit in 32 bits. Label masks are not expected to
//! contain such values; when they do, a warning is logged and the low
//! word is kept anyway.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Deserialize;

use crate::types::{DecodeError, ElementType, OverlayMask};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Returns `true` if `bytes` start with the raw (uncompressed) NPY magic.
#[must_use]
pub fn is_npy(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// Offset of the little-endian `u16` header length.
const HEADER_LEN_OFFSET: usize = 8;

/// Offset of the header text.
const HEADER_OFFSET: usize = 10;

/// The parsed header dict.
#[derive(Debug, Deserialize)]
struct NpyHeader {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// How the data section maps onto an [`ElementType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Elements are used as stored.
    Direct(ElementType),
    /// 64-bit elements narrowed to the given 32-bit type.
    Narrow(ElementType),
}

/// Decode a base64 + zlib NPY payload into an [`OverlayMask`].
///
/// Leading and trailing ASCII whitespace around the base64 text is
/// ignored.
///
/// # Errors
///
/// Returns [`DecodeError::EmptyInput`] for an empty payload,
/// [`DecodeError::Base64`] / [`DecodeError::Inflate`] for transport
/// encoding failures, and any error from [`parse`].
pub fn decode_payload(payload: &[u8]) -> Result<OverlayMask, DecodeError> {
    let payload = payload.trim_ascii();
    if payload.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let compressed = STANDARD.decode(payload)?;
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;
    parse(inflated)
}

/// Parse raw (already inflated) NPY bytes.
///
/// The returned mask reuses `bytes` as its backing storage, except for
/// 64-bit integer arrays which need a strided copy.
///
/// # Errors
///
/// - [`DecodeError::NotNpy`] if the magic string is missing
/// - [`DecodeError::UnsupportedVersion`] if the major version is not 1
/// - [`DecodeError::MalformedHeader`] if the header cannot be parsed or
///   the shape is not 2- or 3-dimensional
/// - [`DecodeError::UnsupportedLayout`] for fortran-ordered arrays
/// - [`DecodeError::UnsupportedDType`] for descriptors outside the table
/// - [`DecodeError::ShapeMismatch`] if the data length disagrees with
///   the shape
pub fn parse(bytes: Vec<u8>) -> Result<OverlayMask, DecodeError> {
    if bytes.len() < HEADER_OFFSET || &bytes[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::NotNpy);
    }

    let major = bytes[MAGIC.len()];
    if major != 1 {
        return Err(DecodeError::UnsupportedVersion(major));
    }

    let header_len =
        usize::from(u16::from_le_bytes([bytes[HEADER_LEN_OFFSET], bytes[HEADER_LEN_OFFSET + 1]]));
    let data_offset = HEADER_OFFSET + header_len;
    if bytes.len() < data_offset {
        return Err(DecodeError::MalformedHeader(format!(
            "header length {header_len} exceeds payload"
        )));
    }

    let text = std::str::from_utf8(&bytes[HEADER_OFFSET..data_offset])
        .map_err(|e| DecodeError::MalformedHeader(e.to_string()))?;
    let header: NpyHeader = serde_json::from_str(&python_literal_to_json(text))
        .map_err(|e| DecodeError::MalformedHeader(e.to_string()))?;

    if header.fortran_order {
        return Err(DecodeError::UnsupportedLayout);
    }

    let layout = layout_for(&header.descr)?;
    let (shape, channels) = shape_and_channels(&header.shape)?;

    match layout {
        Layout::Direct(element_type) => {
            OverlayMask::new(bytes, data_offset, element_type, shape, channels)
        }
        Layout::Narrow(element_type) => {
            let narrowed = narrow_64_to_32(&bytes[data_offset..], element_type, &header)?;
            OverlayMask::new(narrowed, 0, element_type, shape, channels)
        }
    }
}

/// Map a dtype descriptor onto its element layout.
///
/// Single-byte types accept any byte-order mark. Wider types must be
/// little-endian.
fn layout_for(descr: &str) -> Result<Layout, DecodeError> {
    let unsupported = || DecodeError::UnsupportedDType(descr.to_string());
    let (order, kind) = descr.split_at_checked(1).ok_or_else(unsupported)?;

    let layout = match (order, kind) {
        ("<" | ">" | "|", "b1") => Layout::Direct(ElementType::Bool),
        ("<" | ">" | "|", "u1") => Layout::Direct(ElementType::Uint8),
        ("<" | ">" | "|", "i1") => Layout::Direct(ElementType::Int8),
        ("<", "u2") => Layout::Direct(ElementType::Uint16),
        ("<", "i2") => Layout::Direct(ElementType::Int16),
        ("<", "u4") => Layout::Direct(ElementType::Uint32),
        ("<", "i4") => Layout::Direct(ElementType::Int32),
        ("<", "u8") => Layout::Narrow(ElementType::Uint32),
        ("<", "i8") => Layout::Narrow(ElementType::Int32),
        ("<", "f4") => Layout::Direct(ElementType::Float32),
        ("<", "f8") => Layout::Direct(ElementType::Float64),
        _ => return Err(unsupported()),
    };
    Ok(layout)
}

/// Split an NPY shape into `[height, width]` and a channel count.
fn shape_and_channels(shape: &[usize]) -> Result<([u32; 2], u32), DecodeError> {
    let dim = |d: usize| {
        u32::try_from(d).map_err(|_| DecodeError::MalformedHeader(format!("dimension {d} too large")))
    };
    match *shape {
        [height, width] => Ok(([dim(height)?, dim(width)?], 1)),
        [height, width, channels] => Ok(([dim(height)?, dim(width)?], dim(channels)?)),
        _ => Err(DecodeError::MalformedHeader(format!(
            "expected a 2- or 3-dimensional shape, found {shape:?}"
        ))),
    }
}

/// Keep the low 32-bit word of every 64-bit element.
fn narrow_64_to_32(
    data: &[u8],
    element_type: ElementType,
    header: &NpyHeader,
) -> Result<Vec<u8>, DecodeError> {
    let overflow = || DecodeError::MalformedHeader(format!("shape {:?} overflows", header.shape));
    let count = header
        .shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(overflow)?;
    let expected = count.checked_mul(8).ok_or_else(overflow)?;
    if data.len() != expected {
        return Err(DecodeError::ShapeMismatch {
            expected,
            actual: data.len(),
        });
    }

    let mut out = Vec::with_capacity(count * 4);
    let mut lossy = false;
    for word in data.chunks_exact(8) {
        let (low, high) = word.split_at(4);
        lossy |= match element_type {
            ElementType::Int32 => {
                let sign = if low[3] & 0x80 == 0 { 0x00 } else { 0xFF };
                high.iter().any(|b| *b != sign)
            }
            _ => high.iter().any(|b| *b != 0),
        };
        out.extend_from_slice(low);
    }

    if lossy {
        tracing::warn!(
            descr = %header.descr,
            "64-bit mask values exceed 32 bits; high words were dropped"
        );
    }
    Ok(out)
}

/// Rewrite a Python dict literal into JSON.
///
/// Handles the subset NumPy emits: single-quoted strings, tuples,
/// `True`/`False`/`None`, and trailing commas.
fn python_literal_to_json(text: &str) -> String {
    let text = text
        .trim()
        .replace('\'', "\"")
        .replace('(', "[")
        .replace(')', "]")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}' | ']') | None) {
                continue;
            }
        }
        out.push(*c);
    }
    out
}

/// Serialize raw element bytes as an NPY v1 file.
///
/// `descr` is written verbatim; `data` must already be in the byte
/// order it names. The header is space-padded so the data section
/// starts on a 64-byte boundary, as NumPy does.
#[must_use]
pub fn encode_npy(descr: &str, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {dims}, }}");
    let unpadded = HEADER_OFFSET + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(HEADER_OFFSET + header.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    #[expect(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

/// Produce the base64 + zlib payload [`decode_payload`] accepts.
///
/// # Errors
///
/// Returns [`DecodeError::Inflate`] if compression fails.
pub fn encode_payload(descr: &str, shape: &[usize], data: &[u8]) -> Result<String, DecodeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&encode_npy(descr, shape, data))?;
    Ok(STANDARD.encode(encoder.finish()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn round_trip(descr: &str, shape: &[usize], data: &[u8]) -> OverlayMask {
        let payload = encode_payload(descr, shape, data).unwrap();
        decode_payload(payload.as_bytes()).unwrap()
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(decode_payload(b"  \n"), Err(DecodeError::EmptyInput)));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(decode_payload(b"!!!"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn non_zlib_payload_is_rejected() {
        let payload = STANDARD.encode(b"definitely not zlib");
        assert!(matches!(
            decode_payload(payload.as_bytes()),
            Err(DecodeError::Inflate(_))
        ));
    }

    #[test]
    fn missing_magic_is_not_npy() {
        assert!(matches!(parse(vec![0; 32]), Err(DecodeError::NotNpy)));
    }

    #[test]
    fn version_two_is_unsupported() {
        let mut bytes = encode_npy("|u1", &[1, 1], &[5]);
        bytes[6] = 2;
        assert!(matches!(parse(bytes), Err(DecodeError::UnsupportedVersion(2))));
    }

    #[test]
    fn overflowing_shape_is_malformed() {
        let huge = [u32::MAX as usize; 3];
        for descr in ["|u1", "<f8", "<u8", "<i8"] {
            let result = parse(encode_npy(descr, &huge, &[]));
            assert!(
                matches!(result, Err(DecodeError::MalformedHeader(_))),
                "{descr}: {result:?}"
            );
        }
    }

    #[test]
    fn fortran_order_is_unsupported() {
        let mut bytes = encode_npy("|u1", &[1, 1], &[5]);
        let at = bytes.windows(5).position(|w| w == b"False").unwrap();
        bytes[at..at + 5].copy_from_slice(b"True ");
        assert!(matches!(parse(bytes), Err(DecodeError::UnsupportedLayout)));
    }

    #[test]
    fn big_endian_multibyte_is_unsupported() {
        let bytes = encode_npy(">u2", &[1, 1], &[0, 5]);
        assert!(
            matches!(parse(bytes), Err(DecodeError::UnsupportedDType(ref d)) if d == ">u2")
        );
    }

    #[test]
    fn one_dimensional_shape_is_malformed() {
        let bytes = encode_npy("|u1", &[3], &[1, 2, 3]);
        assert!(matches!(parse(bytes), Err(DecodeError::MalformedHeader(_))));
    }

    #[test]
    fn short_data_is_shape_mismatch() {
        let bytes = encode_npy("<u2", &[2, 2], &[1, 0, 2, 0]);
        assert!(matches!(parse(bytes), Err(DecodeError::ShapeMismatch { .. })));
    }

    #[test]
    fn header_is_padded_to_64_bytes() {
        let bytes = encode_npy("|u1", &[2, 2], &[1, 2, 3, 4]);
        assert_eq!((bytes.len() - 4) % 64, 0);
    }

    #[test]
    fn python_literal_rewrite() {
        let json = python_literal_to_json("{'descr': '<f4', 'fortran_order': False, 'shape': (3,), }");
        assert_eq!(json, r#"{"descr": "<f4", "fortran_order": false, "shape": [3]}"#);
    }

    #[test]
    fn single_byte_types_round_trip_any_byte_order() {
        for descr in ["|u1", "<u1", ">u1", "|b1", "|i1"] {
            let mask = round_trip(descr, &[2, 2], &[0, 1, 2, 255]);
            assert_eq!(mask.as_bytes(), &[0, 1, 2, 255], "{descr}");
            assert_eq!(mask.shape(), [2, 2]);
            assert_eq!(mask.channels(), 1);
        }
        let mask = round_trip("|i1", &[1, 1], &[0xFE]);
        assert!((mask.value(0) + 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sixteen_and_thirty_two_bit_types_round_trip() {
        let u16s: Vec<u8> = [0u16, 1, 400, 65535].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<u2", &[2, 2], &u16s);
        assert_eq!(mask.element_type(), ElementType::Uint16);
        assert!((mask.value(2) - 400.0).abs() < f64::EPSILON);

        let i16s: Vec<u8> = [-3i16, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<i2", &[1, 2], &i16s);
        assert!((mask.value(0) + 3.0).abs() < f64::EPSILON);

        let u32s: Vec<u8> = [70_000u32, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<u4", &[2, 1], &u32s);
        assert!((mask.value(0) - 70_000.0).abs() < f64::EPSILON);

        let i32s: Vec<u8> = [-70_000i32, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<i4", &[2, 1], &i32s);
        assert!((mask.value(0) + 70_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn float_types_round_trip() {
        let f32s: Vec<u8> = [0.0f32, 0.25, 1.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<f4", &[1, 3], &f32s);
        assert_eq!(mask.element_type(), ElementType::Float32);
        assert!((mask.value(1) - 0.25).abs() < f64::EPSILON);

        let f64s: Vec<u8> = [-1.5f64, 2.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<f8", &[1, 2], &f64s);
        assert!((mask.value(0) + 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sixty_four_bit_keeps_low_words_only() {
        let values = [1u64, 0x1_0000_0002, 42];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<u8", &[1, 3], &bytes);
        assert_eq!(mask.element_type(), ElementType::Uint32);
        assert!((mask.value(0) - 1.0).abs() < f64::EPSILON);
        // High word dropped: only the low 32 bits survive.
        assert!((mask.value(1) - 2.0).abs() < f64::EPSILON);
        assert!((mask.value(2) - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn signed_sixty_four_bit_preserves_small_negatives() {
        let bytes: Vec<u8> = [-5i64, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mask = round_trip("<i8", &[2, 1], &bytes);
        assert_eq!(mask.element_type(), ElementType::Int32);
        assert!((mask.value(0) + 5.0).abs() < f64::EPSILON);
        assert!((mask.value(1) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn three_dimensional_shape_sets_channels() {
        let data: Vec<u8> = (0..12).collect();
        let mask = round_trip("|u1", &[2, 2, 3], &data);
        assert_eq!(mask.shape(), [2, 2]);
        assert_eq!(mask.channels(), 3);
        assert_eq!(mask.len(), 12);
    }
}
