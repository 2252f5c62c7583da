//! Heatmap painter.
//!
//! In value mode each pixel indexes the field's colorscale by its
//! position within the heatmap range. Otherwise the label color is used
//! with opacity proportional to the pixel's magnitude.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{ColorResolver, PaintContext, buffers, put};
use crate::coloring::ColorMode;
use crate::label::DenseLabel;
use crate::types::{OverlayMask, PaintError};

/// Range assumed for integer heatmaps without a recorded range.
const INTEGER_RANGE: [f64; 2] = [0.0, 255.0];

/// Range used when observed float values collapse to a point.
const UNIT_RANGE: [f64; 2] = [0.0, 1.0];

/// Observed value ranges of float heatmaps, computed once per label.
#[derive(Debug, Default)]
pub struct ScaleCache {
    ranges: Mutex<HashMap<String, [f64; 2]>>,
}

impl ScaleCache {
    /// Cached range for `key`, computing it with `observe` on first use.
    pub fn get_or_insert_with(&self, key: &str, observe: impl FnOnce() -> [f64; 2]) -> [f64; 2] {
        let mut ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);
        *ranges.entry(key.to_owned()).or_insert_with(observe)
    }

    /// Number of cached ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached range.
    pub fn clear(&self) {
        self.ranges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// `[min(0, min), max]` over the first channel of every pixel.
fn observed_range(data: &OverlayMask) -> [f64; 2] {
    let channels = data.channels() as usize;
    let (lo, hi) = (0..data.dimensions().pixel_count())
        .map(|i| data.value(i * channels))
        .filter(|v| v.is_finite())
        .fold((0.0_f64, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if hi > lo { [lo, hi] } else { UNIT_RANGE }
}

/// Value range used to normalize a heatmap.
fn heatmap_range<R>(ctx: PaintContext<'_, R>, path: &str, label: &DenseLabel) -> [f64; 2] {
    if let Some(range) = label.range {
        return range;
    }
    let Some(mask) = &label.mask else {
        return UNIT_RANGE;
    };
    if !mask.data.element_type().is_float() {
        return INTEGER_RANGE;
    }
    let key = format!("{path}:{}", label.instance_key());
    ctx.scales.get_or_insert_with(&key, || observed_range(&mask.data))
}

/// Paint a heatmap.
///
/// # Errors
///
/// Returns [`PaintError`] if the mask has no usable image buffer.
pub async fn paint<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut DenseLabel,
) -> Result<(), PaintError> {
    let [start, stop] = heatmap_range(ctx, path, label);
    let by_scale = ctx.settings.coloring.mode == ColorMode::Value && !ctx.tag_selected(label);
    let color = if by_scale {
        None
    } else {
        Some(ctx.label_color(path, label).await)
    };
    let scale = ctx.settings.colorscale_for(path);
    let (data, image) = buffers(label)?;
    let channels = data.channels() as usize;

    match color {
        None => {
            if scale.is_empty() {
                return Ok(());
            }
            let span = if stop > start { stop - start } else { 1.0 };
            #[expect(clippy::cast_precision_loss)]
            let last = (scale.len() - 1) as f64;
            for i in 0..data.dimensions().pixel_count() {
                let v = data.value(i * channels);
                if v == 0.0 || !v.is_finite() {
                    continue;
                }
                let t = ((v - start).max(0.0) / span).min(1.0);
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let index = (t * last).round() as usize;
                let [r, g, b] = scale[index.min(scale.len() - 1)];
                put(image, i, u32::from_le_bytes([r, g, b, 255]));
            }
        }
        Some(color) => {
            let max = start.abs().max(stop.abs());
            if max == 0.0 {
                return Ok(());
            }
            for i in 0..data.dimensions().pixel_count() {
                let v = data.value(i * channels);
                if v == 0.0 || !v.is_finite() {
                    continue;
                }
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let alpha = (v.abs().min(max) / max * 255.0).round() as u8;
                put(image, i, color.pack(alpha));
            }
        }
    }
    Ok(())
}
