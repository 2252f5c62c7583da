//! Detection mask painter.
//!
//! A detection mask covers the detection's bounding box. Every non-zero
//! pixel gets the label's color at full opacity.

use super::{ColorResolver, PaintContext, buffers, put};
use crate::label::DenseLabel;
use crate::types::PaintError;

/// Paint a detection mask with its label color.
///
/// # Errors
///
/// Returns [`PaintError`] if the mask has no usable image buffer.
pub async fn paint<R: ColorResolver>(
    ctx: PaintContext<'_, R>,
    path: &str,
    label: &mut DenseLabel,
) -> Result<(), PaintError> {
    let word = ctx.label_color(path, label).await.pack(255);
    let (data, image) = buffers(label)?;

    let channels = data.channels() as usize;
    for i in 0..data.dimensions().pixel_count() {
        if !data.is_zero(i * channels) {
            put(image, i, word);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::coloring::ColorSettings;
    use crate::paint::tests::{decoded_label, pixels};
    use crate::paint::{PaletteResolver, ScaleCache};

    #[test]
    fn paints_non_zero_pixels_only() {
        let mut settings = ColorSettings::default();
        settings.customize.push(crate::coloring::CustomizeColor {
            path: "det".into(),
            field_color: Some("#ff0000".into()),
            ..Default::default()
        });
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        let mut label = decoded_label(&[0, 1, 1, 0], [2, 2], 1);
        block_on(paint(ctx, "det", &mut label)).unwrap();

        assert_eq!(
            pixels(&label),
            vec![[0, 0, 0, 0], [255, 0, 0, 255], [255, 0, 0, 255], [0, 0, 0, 0]]
        );
    }

    #[test]
    fn raw_values_are_untouched() {
        let settings = ColorSettings::default();
        let scales = ScaleCache::default();
        let ctx = PaintContext::new(&settings, &PaletteResolver, &scales);

        let mut label = decoded_label(&[0, 7], [1, 2], 1);
        block_on(paint(ctx, "det", &mut label)).unwrap();
        assert_eq!(label.mask.as_ref().unwrap().data.as_bytes(), &[0, 7]);
    }
}
