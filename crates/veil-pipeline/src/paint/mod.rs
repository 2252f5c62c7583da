//! Painters: colorize decoded masks into RGBA pixels.
//!
//! Each painter reads `IntermediateMask::data` and writes packed RGBA
//! words into `IntermediateMask::image`. A raw value of zero is
//! background and is never written. Colors come from a
//! [`ColorResolver`], which in the worker is a round trip to the render
//! thread and here defaults to a local deterministic palette pick.

use std::future::Future;

use futures::future::join_all;

use crate::color::{self, Color};
use crate::coloring::{ColorMode, ColorSettings};
use crate::label::{DenseLabel, Label};
use crate::types::{OverlayMask, PaintError, RenderStatus};

pub mod detection;
pub mod heatmap;
pub mod segmentation;

pub use heatmap::ScaleCache;

/// Color key used for labels whose tags are selected.
pub const LABEL_TAGS_KEY: &str = "_label_tags";

/// Source of colors for keys that have no explicit override.
///
/// Implementations must return the same color for the same
/// `(seed, key)` for the lifetime of a coloring configuration.
pub trait ColorResolver: Sync {
    /// Resolve the color for `key` under `seed`, drawing from `pool`.
    fn resolve(&self, pool: &[String], seed: u64, key: &str) -> impl Future<Output = Color> + Send;
}

/// Resolves colors locally by hashing into the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaletteResolver;

impl PaletteResolver {
    /// The color a key resolves to, computed synchronously.
    #[must_use]
    pub fn pick(pool: &[String], seed: u64, key: &str) -> Color {
        color::pick(&color::parse_pool(pool), seed, key)
    }
}

impl ColorResolver for PaletteResolver {
    fn resolve(&self, pool: &[String], seed: u64, key: &str) -> impl Future<Output = Color> + Send {
        std::future::ready(Self::pick(pool, seed, key))
    }
}

/// Everything a painter needs besides the label itself.
pub struct PaintContext<'a, R> {
    /// Coloring inputs for the current sample.
    pub settings: &'a ColorSettings,
    /// Color source for unconfigured keys.
    pub resolver: &'a R,
    /// Observed heatmap ranges.
    pub scales: &'a ScaleCache,
}

impl<R> Clone for PaintContext<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for PaintContext<'_, R> {}

impl<'a, R: ColorResolver> PaintContext<'a, R> {
    /// Bundle painter inputs.
    #[must_use]
    pub const fn new(settings: &'a ColorSettings, resolver: &'a R, scales: &'a ScaleCache) -> Self {
        Self {
            settings,
            resolver,
            scales,
        }
    }

    /// Resolve `key` against the configured pool and seed.
    pub async fn resolve(&self, key: &str) -> Color {
        let coloring = &self.settings.coloring;
        self.resolver.resolve(&coloring.pool, coloring.seed, key).await
    }

    /// Returns `true` if the label's tags override its color.
    #[must_use]
    pub fn tag_selected(&self, label: &DenseLabel) -> bool {
        self.settings.is_tag_selected(&label.tags)
    }

    /// The single color used for a label under the active mode.
    ///
    /// Selected label tags take precedence over every mode.
    pub async fn label_color(&self, path: &str, label: &DenseLabel) -> Color {
        if self.tag_selected(label) {
            let tag_color = self
                .settings
                .label_tag_colors
                .field_color
                .as_deref()
                .and_then(|s| Color::parse(s).ok());
            return match tag_color {
                Some(c) => c,
                None => self.resolve(LABEL_TAGS_KEY).await,
            };
        }

        let custom = self.settings.customize_for(path);
        match self.settings.coloring.mode {
            ColorMode::Field => match custom.and_then(|c| c.field_color()) {
                Some(c) => c,
                None => self.resolve(path).await,
            },
            ColorMode::Value => {
                let key = custom
                    .and_then(|c| c.color_by_attribute.as_deref())
                    .and_then(|attr| label.attribute_string(attr))
                    .or_else(|| label.label.clone())
                    .unwrap_or_default();
                match custom.and_then(|c| c.value_color(&key)) {
                    Some(c) => c,
                    None => self.resolve(&key).await,
                }
            }
            ColorMode::Instance => self.resolve(&label.instance_key()).await,
        }
    }
}

/// Which algorithm paints a dense label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Painter {
    Detection,
    Heatmap,
    Segmentation,
}

/// A label that failed to paint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaintFailure {
    /// Id of the failing label, if it has one.
    pub label_id: Option<String>,
    /// Why painting failed.
    pub error: PaintError,
}

/// Paint every decoded mask of `label`.
///
/// `Detections` paint each child concurrently; children without a
/// decoded mask are skipped. Failures are logged, leave the label
/// [`RenderStatus::Unset`] and are returned so callers can report them.
pub async fn paint_label<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut Label,
) -> Vec<PaintFailure> {
    match label {
        Label::Detection(l) => paint_dense(ctx, path, Painter::Detection, l).await.into_iter().collect(),
        Label::Heatmap(l) => paint_dense(ctx, path, Painter::Heatmap, l).await.into_iter().collect(),
        Label::Segmentation(l) => paint_dense(ctx, path, Painter::Segmentation, l)
            .await
            .into_iter()
            .collect(),
        Label::Detections(d) => join_all(
            d.detections
                .iter_mut()
                .map(|l| paint_dense(ctx, path, Painter::Detection, l)),
        )
        .await
        .into_iter()
        .flatten()
        .collect(),
    }
}

async fn paint_dense<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    painter: Painter,
    label: &mut DenseLabel,
) -> Option<PaintFailure> {
    if label.render_status != RenderStatus::Decoded || label.mask.is_none() {
        return None;
    }
    label.render_status = RenderStatus::Painting;

    let result = match painter {
        Painter::Detection => detection::paint(ctx, path, label).await,
        Painter::Heatmap => heatmap::paint(ctx, path, label).await,
        Painter::Segmentation => segmentation::paint(ctx, path, label).await,
    };

    match result {
        Ok(()) => {
            label.render_status = RenderStatus::Painted;
            None
        }
        Err(error) => {
            tracing::warn!(field = %path, label = ?label.id, "paint failed: {error}");
            label.render_status = RenderStatus::Unset;
            Some(PaintFailure {
                label_id: label.id.clone(),
                error,
            })
        }
    }
}

/// Split a label's mask into its raw data and a checked RGBA buffer.
pub(crate) fn buffers(label: &mut DenseLabel) -> Result<(&mut OverlayMask, &mut [u8]), PaintError> {
    let mask = label.mask.as_mut().ok_or(PaintError::MissingImage)?;
    let expected = mask.data.dimensions().rgba_len();
    let image = mask.image.as_mut().ok_or(PaintError::MissingImage)?;
    if image.len() != expected {
        return Err(PaintError::SizeMismatch {
            expected,
            actual: image.len(),
        });
    }
    Ok((&mut mask.data, image.as_mut_slice()))
}

/// Write one packed RGBA word at pixel `index`.
pub(crate) fn put(image: &mut [u8], index: usize, word: u32) {
    image[index * 4..index * 4 + 4].copy_from_slice(&word.to_le_bytes());
}
