//! Bitmap stage: turn painted RGBA buffers into finished bitmaps.
//!
//! Only [`RenderStatus::Painted`] labels are converted. The RGBA buffer
//! moves into the bitmap without copying; the mask's `image` slot is
//! left empty so nothing reads the buffer again.

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

use crate::label::{DenseLabel, Label};
use crate::types::{Dimensions, RenderStatus};

/// A finished, transferable RGBA bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap(RgbaImage);

impl Bitmap {
    /// Wrap an RGBA buffer. Returns `None` if the length does not match.
    #[must_use]
    pub fn from_rgba(dimensions: Dimensions, rgba: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(dimensions.width, dimensions.height, rgba).map(Self)
    }

    /// Bitmap size.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.0.width(),
            height: self.0.height(),
        }
    }

    /// Borrow the underlying image.
    #[must_use]
    pub const fn as_image(&self) -> &RgbaImage {
        &self.0
    }

    /// Encode as PNG.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if PNG encoding fails.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.0.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }
}

/// Convert one painted label's buffer into a bitmap.
///
/// Returns `true` if a bitmap was produced. Zero-sized masks drop their
/// buffer without producing a bitmap.
pub fn render(label: &mut DenseLabel) -> bool {
    if label.render_status != RenderStatus::Painted {
        return false;
    }
    let Some(mask) = label.mask.as_mut() else {
        return false;
    };
    let Some(rgba) = mask.image.take() else {
        return false;
    };

    let dimensions = mask.data.dimensions();
    if dimensions.is_empty() {
        return false;
    }
    match Bitmap::from_rgba(dimensions, rgba) {
        Some(bitmap) => {
            mask.bitmap = Some(bitmap);
            true
        }
        None => {
            tracing::warn!(label = ?label.id, "painted buffer does not match mask shape");
            false
        }
    }
}

/// Render every painted dense label of `label`, returning the count.
pub fn render_label(label: &mut Label) -> usize {
    label
        .dense_mut()
        .into_iter()
        .map(render)
        .filter(|done| *done)
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ElementType, IntermediateMask, OverlayMask};

    fn painted(shape: [u32; 2]) -> DenseLabel {
        let len = shape[0] as usize * shape[1] as usize;
        let data = OverlayMask::new(vec![1; len], 0, ElementType::Uint8, shape, 1).unwrap();
        DenseLabel {
            mask: Some(IntermediateMask::new(data)),
            render_status: RenderStatus::Painted,
            ..DenseLabel::default()
        }
    }

    #[test]
    fn painted_label_gets_bitmap_and_drops_buffer() {
        let mut label = painted([2, 3]);
        assert!(render(&mut label));

        let mask = label.mask.as_ref().unwrap();
        assert!(mask.image.is_none());
        assert_eq!(
            mask.bitmap.as_ref().unwrap().dimensions(),
            Dimensions {
                width: 3,
                height: 2
            }
        );
    }

    #[test]
    fn unpainted_label_is_skipped() {
        let mut label = painted([1, 1]);
        label.render_status = RenderStatus::Decoded;
        assert!(!render(&mut label));
        assert!(label.mask.as_ref().unwrap().image.is_some());
    }

    #[test]
    fn zero_sized_mask_drops_buffer_without_bitmap() {
        let mut label = painted([0, 4]);
        assert!(!render(&mut label));
        let mask = label.mask.as_ref().unwrap();
        assert!(mask.image.is_none());
        assert!(mask.bitmap.is_none());
    }

    #[test]
    fn from_rgba_rejects_wrong_length() {
        let dims = Dimensions {
            width: 2,
            height: 2,
        };
        assert!(Bitmap::from_rgba(dims, vec![0; 15]).is_none());
        assert!(Bitmap::from_rgba(dims, vec![0; 16]).is_some());
    }

    #[test]
    fn bitmap_encodes_png() {
        let bitmap = Bitmap::from_rgba(
            Dimensions {
                width: 1,
                height: 1,
            },
            vec![1, 2, 3, 4],
        )
        .unwrap();
        let png = bitmap.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn render_label_counts_detections() {
        let mut label = Label::Detections(crate::label::Detections {
            detections: vec![painted([1, 1]), DenseLabel::default(), painted([1, 2])],
            attributes: serde_json::Map::new(),
        });
        assert_eq!(render_label(&mut label), 2);
    }
}
