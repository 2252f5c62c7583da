//! Segmentation painter.
//!
//! Single-channel masks hold integer class values. Multi-channel masks
//! hold RGB category keys; when the field has a non-empty RGB target
//! table, any key outside it is zeroed in the raw data so the mask's
//! vocabulary stays closed for later queries.

use std::collections::{BTreeSet, HashMap};

use super::{ColorResolver, PaintContext, buffers, put};
use crate::color::Color;
use crate::coloring::{ColorMode, is_rgb_targets};
use crate::label::DenseLabel;
use crate::types::{OverlayMask, PaintError};

/// Paint a segmentation mask.
///
/// # Errors
///
/// Returns [`PaintError`] if the mask has no usable image buffer.
pub async fn paint<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut DenseLabel,
) -> Result<(), PaintError> {
    let channels = label.mask.as_ref().map_or(1, |m| m.data.channels());
    if channels >= 3 {
        paint_rgb(ctx, path, label).await
    } else {
        paint_values(ctx, path, label).await
    }
}

/// Returns `true` if a single color covers the whole integer mask.
fn is_solid<R: ColorResolver>(ctx: PaintContext<'_, R>, path: &str, label: &DenseLabel) -> bool {
    if ctx.tag_selected(label) {
        return true;
    }
    match ctx.settings.coloring.mode {
        ColorMode::Instance => true,
        ColorMode::Value => false,
        // Field mode keeps per-class colors when there are several classes.
        ColorMode::Field => ctx
            .settings
            .mask_targets_for(path)
            .is_none_or(|t| t.len() <= 1),
    }
}

#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn class_value(data: &OverlayMask, index: usize) -> u32 {
    data.value(index).abs().round() as u32
}

async fn paint_values<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut DenseLabel,
) -> Result<(), PaintError> {
    let colors = if is_solid(ctx, path, label) {
        let word = ctx.label_color(path, label).await.pack(255);
        Palette::Solid(word)
    } else {
        let Some(mask) = &label.mask else {
            return Err(PaintError::MissingImage);
        };
        Palette::PerValue(value_colors(ctx, path, &mask.data).await)
    };

    let (data, image) = buffers(label)?;
    let channels = data.channels() as usize;
    for i in 0..data.dimensions().pixel_count() {
        if data.is_zero(i * channels) {
            continue;
        }
        let word = match &colors {
            Palette::Solid(word) => *word,
            Palette::PerValue(table) => match table.get(&class_value(data, i * channels)) {
                Some(word) => *word,
                None => continue,
            },
        };
        put(image, i, word);
    }
    Ok(())
}

enum Palette {
    Solid(u32),
    PerValue(HashMap<u32, u32>),
}

/// Resolve one color per distinct non-zero class value.
///
/// Priority: per-field override, then the configured target colors,
/// then a resolved color for the value.
async fn value_colors<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    data: &OverlayMask,
) -> HashMap<u32, u32> {
    let channels = data.channels() as usize;
    let values: BTreeSet<u32> = (0..data.dimensions().pixel_count())
        .map(|i| class_value(data, i * channels))
        .filter(|v| *v != 0)
        .collect();

    let custom = ctx.settings.customize_for(path);
    let targets = &ctx.settings.coloring.targets;
    let mut table = HashMap::with_capacity(values.len());
    for value in values {
        let configured = custom
            .and_then(|c| c.mask_target_color(value))
            .or_else(|| {
                if targets.is_empty() {
                    return None;
                }
                let entry = &targets[value as usize % targets.len()];
                Color::parse(entry).ok()
            });
        let color = match configured {
            Some(c) => c,
            None => ctx.resolve(&value.to_string()).await,
        };
        table.insert(value, color.pack(255));
    }
    table
}

async fn paint_rgb<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut DenseLabel,
) -> Result<(), PaintError> {
    let solid = if ctx.tag_selected(label) || ctx.settings.coloring.mode != ColorMode::Value {
        Some(ctx.label_color(path, label).await.pack(255))
    } else {
        None
    };
    let targets = ctx
        .settings
        .mask_targets_for(path)
        .filter(|t| is_rgb_targets(t));

    let (data, image) = buffers(label)?;
    let channels = data.channels() as usize;
    let mut dropped = 0usize;
    for i in 0..data.dimensions().pixel_count() {
        let base = i * channels;
        let rgb = [0, 1, 2].map(|c| {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let byte = data.value(base + c).clamp(0.0, 255.0) as u8;
            byte
        });
        if rgb == [0, 0, 0] {
            continue;
        }
        if let Some(targets) = targets
            && !targets.contains_key(&Color::hex_key(rgb))
        {
            for c in 0..channels {
                data.set_zero(base + c);
            }
            dropped += 1;
            continue;
        }
        put(image, i, solid.unwrap_or_else(|| Color(rgb).pack(255)));
    }

    if dropped > 0 {
        tracing::debug!(field = %path, dropped, "zeroed pixels outside mask targets");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::coloring::{ColorSettings, CustomizeColor, MaskTargetColor, MaskTargets};
    use crate::paint::tests::{RecordingResolver, decoded_label, pixels};
    use crate::paint::{PaletteResolver, ScaleCache};

    fn value_settings() -> ColorSettings {
        let mut settings = ColorSettings::default();
        settings.coloring.mode = ColorMode::Value;
        settings
    }

    #[test]
    fn value_mode_prefers_override_then_resolves() {
        let mut settings = value_settings();
        settings.customize.push(CustomizeColor {
            path: "seg".into(),
            mask_targets_colors: vec![MaskTargetColor {
                int_target: 2,
                color: "#00ff00".into(),
            }],
            ..Default::default()
        });
        let resolver = RecordingResolver::default();
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &resolver, &scales);

        let mut label = decoded_label(&[0, 2, 3, 3], [2, 2], 1);
        block_on(paint(ctx, "seg", &mut label)).unwrap();

        let px = pixels(&label);
        assert_eq!(px[0], [0, 0, 0, 0]);
        assert_eq!(px[1], [0, 255, 0, 255]);
        assert_eq!(px[2], px[3]);
        assert_eq!(px[2][3], 255);
        // Value 3 is resolved exactly once.
        assert_eq!(*resolver.keys.lock().unwrap(), vec!["3".to_owned()]);
    }

    #[test]
    fn value_mode_uses_target_colors() {
        let mut settings = value_settings();
        settings.coloring.targets = vec!["#000000".into(), "#0000ff".into()];
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        let mut label = decoded_label(&[1], [1, 1], 1);
        block_on(paint(ctx, "seg", &mut label)).unwrap();
        assert_eq!(pixels(&label), vec![[0, 0, 255, 255]]);
    }

    #[test]
    fn value_mode_override_beats_targets_beats_resolver() {
        let mut settings = value_settings();
        // Value 3 lands on the unparsable entry and falls through.
        settings.coloring.targets = vec!["nope".into(), "#0000ff".into(), "#ff0000".into()];
        settings.customize.push(CustomizeColor {
            path: "seg".into(),
            field_color: Some("#ffffff".into()),
            mask_targets_colors: vec![MaskTargetColor {
                int_target: 1,
                color: "#00ff00".into(),
            }],
            ..Default::default()
        });
        let resolver = RecordingResolver::default();
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &resolver, &scales);

        let mut label = decoded_label(&[1, 2, 3], [1, 3], 1);
        block_on(paint(ctx, "seg", &mut label)).unwrap();

        let px = pixels(&label);
        assert_eq!(px[0], [0, 255, 0, 255]);
        assert_eq!(px[1], [255, 0, 0, 255]);
        // Empty pool, so the resolver hands back the fallback color.
        let [r, g, b] = Color::FALLBACK.0;
        assert_eq!(px[2], [r, g, b, 255]);
        assert_eq!(*resolver.keys.lock().unwrap(), vec!["3".to_owned()]);
    }

    #[test]
    fn field_mode_with_single_target_is_solid() {
        let mut settings = ColorSettings::default();
        let mut targets = MaskTargets::new();
        targets.insert("1".into(), "road".into());
        settings.coloring.mask_targets.insert("seg".into(), targets);
        settings.customize.push(CustomizeColor {
            path: "seg".into(),
            field_color: Some("#ff0000".into()),
            ..Default::default()
        });
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        let mut label = decoded_label(&[1, 2], [1, 2], 1);
        block_on(paint(ctx, "seg", &mut label)).unwrap();
        assert_eq!(pixels(&label), vec![[255, 0, 0, 255], [255, 0, 0, 255]]);
    }

    #[test]
    fn closed_rgb_vocabulary_zeroes_unknown_keys() {
        let mut settings = value_settings();
        let mut targets = MaskTargets::new();
        targets.insert("#ff0000".into(), "road".into());
        settings.coloring.mask_targets.insert("seg".into(), targets);
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        // Known key, unknown key, background.
        let mut label = decoded_label(&[255, 0, 0, 0, 0, 255, 0, 0, 0], [1, 3], 3);
        block_on(paint(ctx, "seg", &mut label)).unwrap();

        let data = &label.mask.as_ref().unwrap().data;
        assert_eq!(data.as_bytes(), &[255, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            pixels(&label),
            vec![[255, 0, 0, 255], [0, 0, 0, 0], [0, 0, 0, 0]]
        );
    }

    #[test]
    fn rgb_without_targets_paints_own_color() {
        let settings = value_settings();
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        let mut label = decoded_label(&[1, 2, 3, 255, 0, 0, 0, 0], [1, 2], 4);
        block_on(paint(ctx, "seg", &mut label)).unwrap();
        assert_eq!(pixels(&label), vec![[1, 2, 3, 255], [0, 0, 0, 0]]);
        assert_eq!(label.mask.as_ref().unwrap().data.as_bytes()[0], 1);
    }

    #[test]
    fn instance_mode_is_solid() {
        let mut settings = ColorSettings::default();
        settings.coloring.mode = ColorMode::Instance;
        let resolver = RecordingResolver::default();
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &resolver, &scales);

        let mut label = decoded_label(&[1, 2], [1, 2], 1);
        block_on(paint(ctx, "seg", &mut label)).unwrap();
        let px = pixels(&label);
        assert_eq!(px[0], px[1]);
        assert_eq!(resolver.keys.lock().unwrap().len(), 1);
    }
}
