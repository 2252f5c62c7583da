//! veil-pipeline: dense label overlay decoding and painting (sans-IO).
//!
//! Turns raw mask payloads into displayable RGBA bitmaps through:
//! decode (NPY / PNG / JPEG) -> paint (field, value or instance
//! coloring) -> bitmap.
//!
//! This crate has **no I/O dependencies** and no async runtime. It
//! operates on in-memory byte slices; fetching, color round trips and
//! message handling live in `veil-fetch` and `veil-worker`.

pub mod bitmap;
pub mod color;
pub mod coloring;
pub mod diagnostics;
pub mod indexed;
pub mod label;
pub mod npy;
pub mod paint;
pub mod png_header;
pub mod raster;
pub mod types;

pub use bitmap::Bitmap;
pub use color::Color;
pub use coloring::{ColorMode, ColorSettings, Coloring};
pub use diagnostics::PipelineDiagnostics;
pub use label::{DenseLabel, Label, LabelClass, LabelError, OverlayField};
pub use paint::{ColorResolver, PaintContext, PaletteResolver, ScaleCache};
pub use types::{
    DecodeError, Dimensions, ElementType, IntermediateMask, OverlayMask, PaintError,
    PipelineError, RenderStatus,
};

use diagnostics::{StageDiagnostics, StageMetrics};
use web_time::Instant;

/// Decode a mask blob of any supported encoding.
///
/// PNG and JPEG images are rasterized, raw NPY bytes are parsed
/// directly, and anything else is treated as base64 + zlib NPY text.
///
/// # Errors
///
/// Returns the [`DecodeError`] of the selected decoder.
pub fn decode_mask(bytes: &[u8]) -> Result<OverlayMask, DecodeError> {
    if png_header::sniff(bytes).is_some() || bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        raster::decode_mask_image(bytes)
    } else if npy::is_npy(bytes) {
        npy::parse(bytes.to_vec())
    } else {
        npy::decode_payload(bytes)
    }
}

/// Result of running one mask through the pipeline offline.
#[derive(Debug)]
pub struct ProcessResult {
    /// The finished overlay.
    pub bitmap: Bitmap,
    /// Per-stage timings and counts.
    pub diagnostics: PipelineDiagnostics,
}

/// Decode, paint and render a single mask without a worker.
///
/// Colors come from [`PaletteResolver`]; `path` names the field for
/// per-field overrides and field-mode color keys.
///
/// # Errors
///
/// Returns [`PipelineError::Label`] if `class` carries no mask, and the
/// first decode or paint error otherwise.
pub fn process(
    bytes: &[u8],
    class: LabelClass,
    path: &str,
    settings: &ColorSettings,
) -> Result<ProcessResult, PipelineError> {
    let total_start = Instant::now();

    // 1. Decode.
    let start = Instant::now();
    let data = decode_mask(bytes)?;
    let dims = data.dimensions();
    let decode = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Decode {
            input_bytes: bytes.len(),
            width: dims.width,
            height: dims.height,
            channels: data.channels(),
            element_type: data.element_type(),
        },
    };

    let dense = DenseLabel {
        mask: Some(IntermediateMask::new(data)),
        render_status: RenderStatus::Decoded,
        ..DenseLabel::default()
    };
    let mut label = match class {
        LabelClass::Detection | LabelClass::Detections => Label::Detection(dense),
        LabelClass::Heatmap => Label::Heatmap(dense),
        LabelClass::Segmentation => Label::Segmentation(dense),
        other => return Err(LabelError::NotDense(other).into()),
    };

    // 2. Paint.
    let start = Instant::now();
    let scales = ScaleCache::default();
    let ctx = PaintContext::new(settings, &PaletteResolver, &scales);
    let failures = futures::executor::block_on(paint::paint_label(ctx, path, &mut label));
    if let Some(failure) = failures.into_iter().next() {
        return Err(failure.error.into());
    }
    let painted_pixels = label
        .dense()
        .first()
        .and_then(|l| l.mask.as_ref())
        .and_then(|m| m.image.as_deref())
        .map_or(0, diagnostics::count_painted);
    let paint = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Paint {
            mode: settings.coloring.mode,
            painted_pixels,
            total_pixels: dims.pixel_count() as u64,
        },
    };

    // 3. Bitmap.
    let start = Instant::now();
    bitmap::render_label(&mut label);
    let bitmap = label
        .dense_mut()
        .into_iter()
        .next()
        .and_then(|l| l.mask.take())
        .and_then(|m| m.bitmap)
        .ok_or(PipelineError::NotRendered)?;
    let bitmap_diag = StageDiagnostics {
        duration: start.elapsed(),
        metrics: StageMetrics::Bitmap {
            width: dims.width,
            height: dims.height,
        },
    };

    Ok(ProcessResult {
        bitmap,
        diagnostics: PipelineDiagnostics {
            decode,
            paint,
            bitmap: bitmap_diag,
            total_duration: total_start.elapsed(),
        },
    })
}
