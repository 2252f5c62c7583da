//! Coloring configuration.
//!
//! Everything here is read-only for the duration of one sample's
//! processing. The wire shape is camelCase JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Strategy used to pick pixel colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// One color per field.
    #[default]
    Field,
    /// Colors keyed by pixel value or label text.
    Value,
    /// Colors keyed by label identity.
    Instance,
}

/// Mask target table: raw value (integer string or `#rrggbb`) to label name.
pub type MaskTargets = BTreeMap<String, String>;

/// Returns `true` if every key of a non-empty target table is an RGB hex key.
#[must_use]
pub fn is_rgb_targets(targets: &MaskTargets) -> bool {
    !targets.is_empty() && targets.keys().all(|k| k.starts_with('#'))
}

/// Global coloring settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Coloring {
    /// Active coloring strategy.
    #[serde(alias = "by")]
    pub mode: ColorMode,
    /// Shared color pool as CSS strings.
    pub pool: Vec<String>,
    /// Seed for deterministic color assignment.
    pub seed: u64,
    /// Default heatmap colorscale.
    pub scale: Vec<[u8; 3]>,
    /// Colors for integer mask values, indexed by value.
    pub targets: Vec<String>,
    /// Per-field mask target tables.
    pub mask_targets: BTreeMap<String, MaskTargets>,
    /// Target table used by fields without their own entry.
    pub default_mask_targets: Option<MaskTargets>,
}

impl Coloring {
    /// Default coloring strategy.
    pub const DEFAULT_MODE: ColorMode = ColorMode::Field;

    /// Default color seed.
    pub const DEFAULT_SEED: u64 = 0;
}

impl Default for Coloring {
    fn default() -> Self {
        Self {
            mode: Self::DEFAULT_MODE,
            pool: Vec::new(),
            seed: Self::DEFAULT_SEED,
            scale: default_scale(),
            targets: Vec::new(),
            mask_targets: BTreeMap::new(),
            default_mask_targets: None,
        }
    }
}

/// Black-to-white ramp used when no colorscale is configured.
fn default_scale() -> Vec<[u8; 3]> {
    (0..=255u8).map(|v| [v, v, v]).collect()
}

/// A value/color pair for explicit overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueColor {
    /// Attribute or label value the override applies to.
    pub value: String,
    /// CSS color string.
    pub color: String,
}

/// An integer mask target/color pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskTargetColor {
    /// Raw mask value.
    pub int_target: u32,
    /// CSS color string.
    pub color: String,
}

/// Per-field color overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomizeColor {
    /// Dotted field path the overrides apply to.
    pub path: String,
    /// Fixed color for field mode.
    pub field_color: Option<String>,
    /// Label attribute whose value selects the color in value mode.
    pub color_by_attribute: Option<String>,
    /// Attribute value to color table.
    pub value_colors: Vec<ValueColor>,
    /// Raw mask value to color table.
    pub mask_targets_colors: Vec<MaskTargetColor>,
}

impl CustomizeColor {
    /// Parsed field color, if configured and valid.
    #[must_use]
    pub fn field_color(&self) -> Option<Color> {
        parse_logged(self.field_color.as_deref()?)
    }

    /// Color override for an attribute value.
    #[must_use]
    pub fn value_color(&self, value: &str) -> Option<Color> {
        self.value_colors
            .iter()
            .find(|vc| vc.value == value)
            .and_then(|vc| parse_logged(&vc.color))
    }

    /// Color override for a raw mask value.
    #[must_use]
    pub fn mask_target_color(&self, value: u32) -> Option<Color> {
        self.mask_targets_colors
            .iter()
            .find(|mc| mc.int_target == value)
            .and_then(|mc| parse_logged(&mc.color))
    }
}

/// Colors applied to tagged labels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelTagColors {
    /// Color for every tagged label.
    pub field_color: Option<String>,
}

/// Heatmap colorscale for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldColorscale {
    /// Dotted field path.
    pub path: String,
    /// Colorscale stops, low to high.
    pub rgb: Vec<[u8; 3]>,
}

/// All color-related inputs of one `processSample` call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorSettings {
    /// Global coloring settings.
    pub coloring: Coloring,
    /// Per-field overrides.
    #[serde(alias = "customizeColorSetting")]
    pub customize: Vec<CustomizeColor>,
    /// Per-field heatmap colorscales.
    #[serde(alias = "colorscale")]
    pub colorscales: Vec<FieldColorscale>,
    /// Colors for tagged labels.
    pub label_tag_colors: LabelTagColors,
    /// Tags that switch a label to the label-tag color.
    pub selected_label_tags: Vec<String>,
}

impl ColorSettings {
    /// Overrides for a field path.
    #[must_use]
    pub fn customize_for(&self, path: &str) -> Option<&CustomizeColor> {
        self.customize.iter().find(|c| c.path == path)
    }

    /// Heatmap colorscale for a field path, falling back to the global scale.
    #[must_use]
    pub fn colorscale_for(&self, path: &str) -> &[[u8; 3]] {
        self.colorscales
            .iter()
            .find(|c| c.path == path && !c.rgb.is_empty())
            .map_or(self.coloring.scale.as_slice(), |c| c.rgb.as_slice())
    }

    /// Mask target table for a field path, falling back to the default.
    #[must_use]
    pub fn mask_targets_for(&self, path: &str) -> Option<&MaskTargets> {
        self.coloring
            .mask_targets
            .get(path)
            .or(self.coloring.default_mask_targets.as_ref())
    }

    /// Returns `true` if any of `tags` is selected.
    #[must_use]
    pub fn is_tag_selected(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.selected_label_tags.contains(t))
    }
}

fn parse_logged(s: &str) -> Option<Color> {
    match Color::parse(s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("ignoring color override: {e}");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_wire_shape() {
        let json = r##"{
            "coloring": {
                "by": "value",
                "pool": ["#ff0000", "#00ff00"],
                "seed": 3,
                "maskTargets": {"ground_truth": {"1": "car"}}
            },
            "customizeColorSetting": [
                {"path": "ground_truth", "fieldColor": "#0000ff",
                 "maskTargetsColors": [{"intTarget": 1, "color": "#123456"}]}
            ],
            "selectedLabelTags": ["reviewed"]
        }"##;
        let settings: ColorSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.coloring.mode, ColorMode::Value);
        assert_eq!(settings.coloring.seed, 3);
        assert_eq!(settings.coloring.scale.len(), 256);
        let custom = settings.customize_for("ground_truth").unwrap();
        assert_eq!(custom.field_color(), Some(Color([0, 0, 255])));
        assert_eq!(custom.mask_target_color(1), Some(Color([0x12, 0x34, 0x56])));
        assert_eq!(custom.mask_target_color(2), None);
        assert!(settings.is_tag_selected(&["reviewed".into()]));
        assert!(!settings.is_tag_selected(&[]));
    }

    #[test]
    fn mask_targets_fall_back_to_default() {
        let mut settings = ColorSettings::default();
        assert!(settings.mask_targets_for("seg").is_none());

        let mut targets = MaskTargets::new();
        targets.insert("#ff0000".into(), "road".into());
        settings.coloring.default_mask_targets = Some(targets.clone());
        assert_eq!(settings.mask_targets_for("seg"), Some(&targets));
        assert!(is_rgb_targets(&targets));
    }

    #[test]
    fn integer_targets_are_not_rgb() {
        let mut targets = MaskTargets::new();
        targets.insert("1".into(), "car".into());
        assert!(!is_rgb_targets(&targets));
        assert!(!is_rgb_targets(&MaskTargets::new()));
    }

    #[test]
    fn colorscale_prefers_field_entry() {
        let mut settings = ColorSettings::default();
        settings.colorscales.push(FieldColorscale {
            path: "heat".into(),
            rgb: vec![[0, 0, 0], [255, 0, 0]],
        });
        assert_eq!(settings.colorscale_for("heat").len(), 2);
        assert_eq!(settings.colorscale_for("other").len(), 256);
    }

    #[test]
    fn invalid_override_is_ignored() {
        let custom = CustomizeColor {
            field_color: Some("not-a-color".into()),
            ..CustomizeColor::default()
        };
        assert_eq!(custom.field_color(), None);
    }
}
