//! Sample processing with phase barriers.
//!
//! Every label of a sample is decoded before any is painted, and every
//! label is painted before any bitmap is made. Each phase settles all
//! of its labels, successes and failures alike, before the next starts.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use veil_fetch::{FetchPool, FetchSettings};
use veil_pipeline::paint::paint_label;
use veil_pipeline::{ColorResolver, ColorSettings, PaintContext, ScaleCache, bitmap};

use crate::cache::MaskCache;
use crate::loader::{LoadContext, load_label};
use crate::protocol::RenderParams;
use crate::sample::{Sample, SkippedLabel};

/// Decode, paint and render every lifted label of `sample`.
///
/// Returns the labels that were skipped by the loader or a painter.
#[tracing::instrument(skip_all, fields(labels = sample.len()))]
pub async fn process_sample<R: ColorResolver>(
    sample: &mut Sample,
    loader: LoadContext<'_>,
    resolver: &R,
    scales: &ScaleCache,
) -> Vec<SkippedLabel> {
    // 1. Decode.
    let mut skipped: Vec<SkippedLabel> = join_all(
        sample
            .labels
            .iter_mut()
            .map(|field| load_label(loader, &field.path, &mut field.label)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    // 2. Paint.
    let ctx = PaintContext::new(loader.colors, resolver, scales);
    let painted = join_all(sample.labels.iter_mut().map(|field| async move {
        let failures = paint_label(ctx, &field.path, &mut field.label).await;
        failures
            .into_iter()
            .map(|f| SkippedLabel::new(&field.path, f.label_id, &f.error))
            .collect::<Vec<_>>()
    }))
    .await;
    skipped.extend(painted.into_iter().flatten());

    // 3. Bitmap.
    let rendered: usize = sample
        .labels
        .iter_mut()
        .map(|field| bitmap::render_label(&mut field.label))
        .sum();

    tracing::debug!(rendered, skipped = skipped.len(), "sample processed");
    skipped
}

/// Everything needed to render samples outside of a single call.
///
/// Cheap to clone; the frame stream holds one for its lifetime.
pub struct Renderer<R> {
    pub pool: FetchPool,
    pub fetch: Arc<FetchSettings>,
    pub params: Arc<RenderParams>,
    pub colors: Arc<ColorSettings>,
    pub resolver: R,
    pub scales: Arc<ScaleCache>,
    pub masks: Arc<MaskCache>,
}

impl<R: Clone> Clone for Renderer<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            fetch: Arc::clone(&self.fetch),
            params: Arc::clone(&self.params),
            colors: Arc::clone(&self.colors),
            resolver: self.resolver.clone(),
            scales: Arc::clone(&self.scales),
            masks: Arc::clone(&self.masks),
        }
    }
}

impl<R: ColorResolver> Renderer<R> {
    /// Bundle rendering inputs for `params`.
    #[must_use]
    pub fn new(
        pool: FetchPool,
        fetch: Arc<FetchSettings>,
        params: RenderParams,
        resolver: R,
        scales: Arc<ScaleCache>,
        masks: Arc<MaskCache>,
    ) -> Self {
        let colors = Arc::new(params.color_settings());
        Self {
            pool,
            fetch,
            params: Arc::new(params),
            colors,
            resolver,
            scales,
            masks,
        }
    }

    /// Lift and render the labels of one sample JSON. `prefix` is
    /// prepended to field paths, e.g. `frames`.
    pub async fn render(&self, value: Value, prefix: &str) -> (Sample, Vec<SkippedLabel>) {
        let (mut sample, mut skipped) =
            Sample::from_json(value, &self.params.schema, prefix, &self.params.active_paths);
        let loader = LoadContext {
            pool: &self.pool,
            fetch: &self.fetch,
            sources: &self.params.sources,
            colors: &self.colors,
            masks: &self.masks,
        };
        skipped.extend(process_sample(&mut sample, loader, &self.resolver, &self.scales).await);
        (sample, skipped)
    }
}
