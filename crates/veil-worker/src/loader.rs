//! Mask loading.
//!
//! Brings every dense label of a field to [`RenderStatus::Decoded`]:
//! recolored labels reuse their mask, inline NPY payloads are decoded
//! in place, and on-disk masks come from the [`MaskCache`] or are
//! fetched through the shared pool.
//! Failures leave the label unset and are returned as skipped labels.

use std::collections::BTreeMap;

use veil_fetch::{FetchPool, FetchSettings};
use veil_pipeline::coloring::is_rgb_targets;
use veil_pipeline::{
    ColorSettings, DecodeError, DenseLabel, IntermediateMask, Label, LabelClass, OverlayMask,
    RenderStatus, indexed, npy, png_header, raster,
};

use crate::cache::{MaskCache, MaskKey};
use crate::error::WorkerError;
use crate::sample::SkippedLabel;

/// Shared inputs for loading one sample's masks.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub pool: &'a FetchPool,
    pub fetch: &'a FetchSettings,
    pub sources: &'a BTreeMap<String, String>,
    pub colors: &'a ColorSettings,
    pub masks: &'a MaskCache,
}

/// Load every mask of `label`, stored at field `path`.
///
/// `Detections` load their children concurrently. Returns one entry
/// per label that could not be loaded.
pub async fn load_label(ctx: LoadContext<'_>, path: &str, label: &mut Label) -> Vec<SkippedLabel> {
    let class = label.class();
    let field = label.overlay_field();
    let source_key = format!("{path}.{}", field.disk);
    let source_key = source_key.as_str();

    let results = futures::future::join_all(label.dense_mut().into_iter().map(|dense| async move {
        let outcome = load_dense(ctx, path, source_key, class, dense).await;
        (dense.id.clone(), outcome)
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(label_id, outcome)| match outcome {
            Ok(()) => None,
            Err(error) => Some(SkippedLabel::new(path, label_id, &error)),
        })
        .collect()
}

async fn load_dense(
    ctx: LoadContext<'_>,
    path: &str,
    source_key: &str,
    class: LabelClass,
    label: &mut DenseLabel,
) -> Result<(), WorkerError> {
    if let Some(mask) = label.mask.as_mut() {
        if mask.reset_for_recolor() {
            tracing::trace!(field = %path, "recoloring existing mask");
        }
        if mask.image.is_some() {
            label.render_status = RenderStatus::Decoded;
        }
        return Ok(());
    }

    let result = if let Some(payload) = label.inline.clone() {
        label.render_status = RenderStatus::Pending;
        decode_blocking(move || npy::decode_payload(payload.as_bytes())).await
    } else if let Some(disk_path) = label.disk_path.as_deref() {
        label.render_status = RenderStatus::Pending;
        let source = ctx.sources.get(source_key).map_or(disk_path, String::as_str);
        fetch_and_decode(ctx, path, class, source).await
    } else {
        return Ok(());
    };

    match result {
        Ok(data) => {
            label.mask = Some(IntermediateMask::new(data));
            label.render_status = RenderStatus::Decoded;
            Ok(())
        }
        Err(error) => {
            tracing::warn!(field = %path, label = ?label.id, "mask not loaded: {error}");
            label.render_status = RenderStatus::Unset;
            Err(error)
        }
    }
}

async fn fetch_and_decode(
    ctx: LoadContext<'_>,
    path: &str,
    class: LabelClass,
    source: &str,
) -> Result<OverlayMask, WorkerError> {
    let key = MaskKey {
        url: ctx.fetch.media_url(source)?,
        indexed: class == LabelClass::Segmentation
            && ctx.colors.mask_targets_for(path).is_some_and(is_rgb_targets),
    };
    if let Some(mask) = ctx.masks.get(&key) {
        tracing::trace!(field = %path, url = %key.url, "reusing cached mask");
        return Ok(mask);
    }

    let response = ctx.pool.fetch(ctx.fetch.get(key.url.clone())).await?;
    let indexed_route = key.indexed;
    tracing::debug!(field = %path, bytes = response.body.len(), indexed_route, "fetched mask");

    let body = response.body;
    let mask = decode_blocking(move || decode_fetched(&body, indexed_route)).await?;
    ctx.masks.insert(key, mask.clone());
    Ok(mask)
}

/// Decode a fetched mask image, taking the palette route for indexed
/// PNGs when the field's targets are RGB keys.
fn decode_fetched(bytes: &[u8], indexed_route: bool) -> Result<OverlayMask, DecodeError> {
    let indexed_png = png_header::sniff(bytes).is_some_and(|h| h.is_indexed() && h.bit_depth <= 8);
    if indexed_route && indexed_png {
        indexed::decode_indexed_png(bytes)
    } else {
        raster::decode_mask_image(bytes)
    }
}

async fn decode_blocking<F>(decode: F) -> Result<OverlayMask, WorkerError>
where
    F: FnOnce() -> Result<OverlayMask, DecodeError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(decode).await??)
}
