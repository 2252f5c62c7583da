//! Shared types for the veil overlay pipeline.

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;

/// Re-export `RgbaImage` so downstream crates can reference finished
/// bitmaps without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create dimensions from a `[height, width]` shape.
    #[must_use]
    pub const fn from_shape(shape: [u32; 2]) -> Self {
        Self {
            width: shape[1],
            height: shape[0],
        }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of an RGBA buffer covering these dimensions.
    #[must_use]
    pub const fn rgba_len(self) -> usize {
        self.pixel_count() * 4
    }

    /// Returns `true` if either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Element type of a raw mask buffer.
///
/// Every element type is stored little-endian. 64-bit integer payloads
/// never appear here: the NPY decoder narrows them to their 32-bit
/// counterparts (see [`crate::npy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bool,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl ElementType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Bool | Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Returns `true` for floating-point element types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// A decoded raw per-pixel category/value buffer plus its shape.
///
/// The element storage is a byte buffer viewed at `offset`, so decoders
/// can hand over their working allocation without copying (the NPY
/// decoder keeps its inflated payload and points past the header).
///
/// Invariant: the viewed byte length equals
/// `height * width * channels * element_type.byte_width()`.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMask {
    bytes: Vec<u8>,
    offset: usize,
    element_type: ElementType,
    shape: [u32; 2],
    channels: u32,
}

impl OverlayMask {
    /// Wrap `bytes[offset..]` as a mask of the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::ShapeMismatch`] if the viewed byte length
    /// does not match `shape` and `channels`, and
    /// [`DecodeError::MalformedHeader`] if that length is not
    /// representable.
    pub fn new(
        bytes: Vec<u8>,
        offset: usize,
        element_type: ElementType,
        shape: [u32; 2],
        channels: u32,
    ) -> Result<Self, DecodeError> {
        let expected = [shape[0], shape[1], channels]
            .into_iter()
            .try_fold(element_type.byte_width(), |acc, d| acc.checked_mul(d as usize))
            .ok_or_else(|| {
                DecodeError::MalformedHeader(format!(
                    "shape {shape:?} x {channels} of {element_type:?} overflows"
                ))
            })?;
        let actual = bytes.len().saturating_sub(offset);
        if actual != expected {
            return Err(DecodeError::ShapeMismatch { expected, actual });
        }
        Ok(Self {
            bytes,
            offset,
            element_type,
            shape,
            channels,
        })
    }

    /// `[height, width]`.
    #[must_use]
    pub const fn shape(&self) -> [u32; 2] {
        self.shape
    }

    /// Width and height as [`Dimensions`].
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::from_shape(self.shape)
    }

    /// Number of channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> u32 {
        self.channels
    }

    /// Element type tag.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Total element count (`height * width * channels`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len() / self.element_type.byte_width()
    }

    /// Returns `true` if the mask holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw little-endian element bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[self.offset..]
    }

    /// Mutable access to the raw element bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.offset..]
    }

    /// Element `index` widened to `f64`.
    #[must_use]
    pub fn value(&self, index: usize) -> f64 {
        let data = self.as_bytes();
        let width = self.element_type.byte_width();
        let at = &data[index * width..(index + 1) * width];
        match self.element_type {
            ElementType::Bool | ElementType::Uint8 => f64::from(at[0]),
            ElementType::Int8 => f64::from(i8::from_le_bytes([at[0]])),
            ElementType::Uint16 => f64::from(u16::from_le_bytes([at[0], at[1]])),
            ElementType::Int16 => f64::from(i16::from_le_bytes([at[0], at[1]])),
            ElementType::Uint32 => f64::from(u32::from_le_bytes([at[0], at[1], at[2], at[3]])),
            ElementType::Int32 => f64::from(i32::from_le_bytes([at[0], at[1], at[2], at[3]])),
            ElementType::Float32 => f64::from(f32::from_le_bytes([at[0], at[1], at[2], at[3]])),
            ElementType::Float64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(at);
                f64::from_le_bytes(word)
            }
        }
    }

    /// Returns `true` if element `index` is zero (background).
    #[must_use]
    pub fn is_zero(&self, index: usize) -> bool {
        if self.element_type.is_float() {
            return self.value(index) == 0.0;
        }
        let width = self.element_type.byte_width();
        self.as_bytes()[index * width..(index + 1) * width]
            .iter()
            .all(|b| *b == 0)
    }

    /// Overwrite element `index` with zero.
    pub fn set_zero(&mut self, index: usize) {
        let width = self.element_type.byte_width();
        self.as_bytes_mut()[index * width..(index + 1) * width].fill(0);
    }
}

/// Per-label progress through decode, paint and bitmap generation.
///
/// Only [`Painted`](Self::Painted) labels proceed to bitmap generation;
/// any other status means the label is skipped for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    #[default]
    Unset,
    Pending,
    Decoded,
    Painting,
    Painted,
}

/// An [`OverlayMask`] paired with the RGBA buffer a painter writes into.
///
/// `image` is `Some` between decoding and bitmap generation. Once the
/// bitmap stage runs, the buffer moves into `bitmap` and `image`
/// becomes `None`.
#[derive(Debug)]
pub struct IntermediateMask {
    /// Raw decoded values.
    pub data: OverlayMask,
    /// RGBA pixels, `height * width * 4` bytes.
    pub image: Option<Vec<u8>>,
    /// Finished bitmap from a previous pass.
    pub bitmap: Option<Bitmap>,
}

impl IntermediateMask {
    /// Pair `data` with a fresh, fully transparent RGBA buffer.
    #[must_use]
    pub fn new(data: OverlayMask) -> Self {
        let image = vec![0u8; data.dimensions().rgba_len()];
        Self {
            data,
            image: Some(image),
            bitmap: None,
        }
    }

    /// Prepare a previously rendered mask for recoloring.
    ///
    /// If a bitmap exists but no pending `image` buffer, a new buffer is
    /// allocated from the bitmap's dimensions and the bitmap is
    /// released. Returns `true` if the mask was reset.
    pub fn reset_for_recolor(&mut self) -> bool {
        if self.image.is_some() {
            return false;
        }
        let Some(bitmap) = self.bitmap.take() else {
            return false;
        };
        self.image = Some(vec![0u8; bitmap.dimensions().rgba_len()]);
        true
    }
}

/// Errors from the binary decoders.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`,
/// `std::io::Error` and `base64::DecodeError` do not implement serde
/// traits. Those variants are serialized as their `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input bytes were empty.
    #[error("input data is empty")]
    EmptyInput,

    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload could not be inflated.
    #[error("failed to inflate payload: {0}")]
    Inflate(#[from] std::io::Error),

    /// The bytes do not start with the NPY magic string.
    #[error("not an NPY payload")]
    NotNpy,

    /// The NPY major version is not 1.
    #[error("unsupported NPY version {0}")]
    UnsupportedVersion(u8),

    /// The NPY header dict could not be parsed.
    #[error("malformed NPY header: {0}")]
    MalformedHeader(String),

    /// The array is stored in column-major order.
    #[error("fortran-ordered arrays are not supported")]
    UnsupportedLayout,

    /// The dtype descriptor is not in the supported table.
    #[error("unsupported dtype {0:?}")]
    UnsupportedDType(String),

    /// The data length does not match the declared shape.
    #[error("expected {expected} data bytes, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// A packed palette index has no palette entry.
    #[error("palette index {index} out of range for palette of {palette_len}")]
    PaletteIndexOutOfRange { index: u8, palette_len: usize },

    /// Indexed bit depth outside {1, 2, 4, 8}.
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),

    /// The PNG stream is structurally invalid.
    #[error("malformed PNG: {0}")]
    MalformedPng(String),

    /// Failed to decode the image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
}

/// Serde-compatible proxy for `DecodeError`.
#[derive(Serialize, Deserialize)]
enum DecodeErrorProxy {
    EmptyInput,
    Base64(String),
    Inflate(String),
    NotNpy,
    UnsupportedVersion(u8),
    MalformedHeader(String),
    UnsupportedLayout,
    UnsupportedDType(String),
    ShapeMismatch { expected: usize, actual: usize },
    PaletteIndexOutOfRange { index: u8, palette_len: usize },
    UnsupportedBitDepth(u8),
    MalformedPng(String),
    ImageDecode(String),
}

impl Serialize for DecodeError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::EmptyInput => DecodeErrorProxy::EmptyInput,
            Self::Base64(e) => DecodeErrorProxy::Base64(e.to_string()),
            Self::Inflate(e) => DecodeErrorProxy::Inflate(e.to_string()),
            Self::NotNpy => DecodeErrorProxy::NotNpy,
            Self::UnsupportedVersion(v) => DecodeErrorProxy::UnsupportedVersion(*v),
            Self::MalformedHeader(s) => DecodeErrorProxy::MalformedHeader(s.clone()),
            Self::UnsupportedLayout => DecodeErrorProxy::UnsupportedLayout,
            Self::UnsupportedDType(s) => DecodeErrorProxy::UnsupportedDType(s.clone()),
            Self::ShapeMismatch { expected, actual } => DecodeErrorProxy::ShapeMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::PaletteIndexOutOfRange { index, palette_len } => {
                DecodeErrorProxy::PaletteIndexOutOfRange {
                    index: *index,
                    palette_len: *palette_len,
                }
            }
            Self::UnsupportedBitDepth(d) => DecodeErrorProxy::UnsupportedBitDepth(*d),
            Self::MalformedPng(s) => DecodeErrorProxy::MalformedPng(s.clone()),
            Self::ImageDecode(e) => DecodeErrorProxy::ImageDecode(e.to_string()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DecodeError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = DecodeErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            DecodeErrorProxy::EmptyInput => Self::EmptyInput,
            // The typed source errors cannot be reconstructed; keep the
            // message under the closest structural variant.
            DecodeErrorProxy::Base64(msg) => Self::MalformedHeader(format!("base64: {msg}")),
            DecodeErrorProxy::Inflate(msg) => Self::Inflate(std::io::Error::other(msg)),
            DecodeErrorProxy::NotNpy => Self::NotNpy,
            DecodeErrorProxy::UnsupportedVersion(v) => Self::UnsupportedVersion(v),
            DecodeErrorProxy::MalformedHeader(s) => Self::MalformedHeader(s),
            DecodeErrorProxy::UnsupportedLayout => Self::UnsupportedLayout,
            DecodeErrorProxy::UnsupportedDType(s) => Self::UnsupportedDType(s),
            DecodeErrorProxy::ShapeMismatch { expected, actual } => {
                Self::ShapeMismatch { expected, actual }
            }
            DecodeErrorProxy::PaletteIndexOutOfRange { index, palette_len } => {
                Self::PaletteIndexOutOfRange { index, palette_len }
            }
            DecodeErrorProxy::UnsupportedBitDepth(d) => Self::UnsupportedBitDepth(d),
            DecodeErrorProxy::MalformedPng(s) => Self::MalformedPng(s),
            DecodeErrorProxy::ImageDecode(msg) => Self::MalformedPng(format!("image decode: {msg}")),
        })
    }
}

/// Errors from painting a decoded mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PaintError {
    /// The mask has no RGBA buffer to paint into.
    #[error("mask has no image buffer to paint into")]
    MissingImage,

    /// The RGBA buffer does not cover the mask.
    #[error("image buffer is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A configured color string could not be parsed.
    #[error("invalid color {0:?}")]
    InvalidColor(String),
}

/// Errors from running a whole mask through decode, paint and bitmap.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Decoding failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Painting failed.
    #[error(transparent)]
    Paint(#[from] PaintError),

    /// The label could not be built.
    #[error(transparent)]
    Label(#[from] crate::label::LabelError),

    /// The mask decoded and painted but produced no bitmap.
    #[error("mask produced no bitmap")]
    NotRendered,
}
