//! Label classes and the dense labels that carry masks.
//!
//! Labels arrive as JSON objects tagged with a `_cls` class name. Only
//! the dense classes are parsed into typed values; everything a label
//! carries besides its mask stays in an attribute map so the label can
//! be written back unchanged apart from its rendered overlay.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::{IntermediateMask, RenderStatus};

/// Errors from interpreting label JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LabelError {
    /// The `_cls` name is not a known label class.
    #[error("unknown label class {0:?}")]
    UnknownClass(String),

    /// A dense label was expected but the class carries no mask.
    #[error("{0} labels do not carry masks")]
    NotDense(LabelClass),

    /// The label value is not a JSON object.
    #[error("label is not an object")]
    NotAnObject,
}

/// Every label class a schema may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelClass {
    Detection,
    Detections,
    Heatmap,
    Segmentation,
    Classification,
    Classifications,
    Keypoint,
    Keypoints,
    Polyline,
    Polylines,
    TemporalDetection,
    TemporalDetections,
    GeoLocation,
    GeoLocations,
    /// Container of nested fields, walked recursively.
    EmbeddedDocument,
}

impl LabelClass {
    /// Returns `true` for classes that carry (or contain) a dense mask.
    #[must_use]
    pub const fn is_dense(self) -> bool {
        matches!(
            self,
            Self::Detection | Self::Detections | Self::Heatmap | Self::Segmentation
        )
    }

    /// Names of the inline and on-disk mask fields for this class.
    ///
    /// `Detections` reports the field of its children.
    #[must_use]
    pub const fn overlay_field(self) -> Option<OverlayField> {
        match self {
            Self::Detection | Self::Detections | Self::Segmentation => Some(OverlayField::MASK),
            Self::Heatmap => Some(OverlayField::MAP),
            _ => None,
        }
    }
}

impl FromStr for LabelClass {
    type Err = LabelError;

    /// Parse a class name. Module-qualified names
    /// (`fiftyone.core.labels.Detection`) use their last segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('.').next().unwrap_or(s);
        Ok(match name {
            "Detection" => Self::Detection,
            "Detections" => Self::Detections,
            "Heatmap" => Self::Heatmap,
            "Segmentation" => Self::Segmentation,
            "Classification" => Self::Classification,
            "Classifications" => Self::Classifications,
            "Keypoint" => Self::Keypoint,
            "Keypoints" => Self::Keypoints,
            "Polyline" => Self::Polyline,
            "Polylines" => Self::Polylines,
            "TemporalDetection" => Self::TemporalDetection,
            "TemporalDetections" => Self::TemporalDetections,
            "GeoLocation" => Self::GeoLocation,
            "GeoLocations" => Self::GeoLocations,
            "EmbeddedDocument" | "DynamicEmbeddedDocument" => Self::EmbeddedDocument,
            _ => return Err(LabelError::UnknownClass(s.to_owned())),
        })
    }
}

impl fmt::Display for LabelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inline and on-disk mask field names of a dense label class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayField {
    /// Field holding an inline NPY payload.
    pub canonical: &'static str,
    /// Field holding an on-disk mask path.
    pub disk: &'static str,
}

impl OverlayField {
    /// `mask` / `mask_path`.
    pub const MASK: Self = Self {
        canonical: "mask",
        disk: "mask_path",
    };
    /// `map` / `map_path`.
    pub const MAP: Self = Self {
        canonical: "map",
        disk: "map_path",
    };
}

/// Key of the decoded-mask summary written by [`DenseLabel::to_json`].
pub const OVERLAY_KEY: &str = "overlay";

/// Key of the render status written by [`DenseLabel::to_json`].
pub const RENDER_STATUS_KEY: &str = "renderStatus";

/// A label that may carry a dense mask.
#[derive(Debug, Default)]
pub struct DenseLabel {
    /// Label id (`_id` or `id`).
    pub id: Option<String>,
    /// Label text.
    pub label: Option<String>,
    /// Instance index.
    pub index: Option<i64>,
    /// Label tags.
    pub tags: Vec<String>,
    /// Recorded heatmap value range.
    pub range: Option<[f64; 2]>,
    /// Inline base64 NPY payload, kept after decoding.
    pub inline: Option<String>,
    /// Recorded on-disk mask path.
    pub disk_path: Option<String>,
    /// Decoded mask and its paint buffers.
    pub mask: Option<IntermediateMask>,
    /// Progress through decode, paint and bitmap generation.
    pub render_status: RenderStatus,
    /// Every other key of the label object, written back unchanged.
    pub attributes: Map<String, Value>,
}

impl DenseLabel {
    /// Read a label object.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::NotAnObject`] if `value` is not an object.
    pub fn from_json(value: Value, field: OverlayField) -> Result<Self, LabelError> {
        let Value::Object(mut attributes) = value else {
            return Err(LabelError::NotAnObject);
        };

        attributes.remove(OVERLAY_KEY);
        attributes.remove(RENDER_STATUS_KEY);
        let inline = attributes
            .remove(field.canonical)
            .and_then(|v| inline_payload(&v));
        let disk_path = attributes
            .get(field.disk)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let id = attributes
            .get("_id")
            .or_else(|| attributes.get("id"))
            .and_then(id_string);
        let label = attributes
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let index = attributes.get("index").and_then(Value::as_i64);
        let tags = attributes
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let range = attributes.get("range").and_then(|r| {
            let r = r.as_array()?;
            Some([r.first()?.as_f64()?, r.get(1)?.as_f64()?])
        });

        Ok(Self {
            id,
            label,
            index,
            tags,
            range,
            inline,
            disk_path,
            mask: None,
            render_status: RenderStatus::Unset,
            attributes,
        })
    }

    /// Write the label back to JSON.
    ///
    /// An inline payload stays under the canonical field so the label
    /// can be submitted again. A decoded mask is summarized under
    /// [`OVERLAY_KEY`]; the pixel buffers themselves travel alongside
    /// the JSON.
    #[must_use]
    pub fn to_json(&self, field: OverlayField) -> Value {
        let mut out = self.attributes.clone();
        if let Some(inline) = &self.inline {
            out.insert(field.canonical.to_owned(), Value::String(inline.clone()));
        }
        if let Some(mask) = &self.mask {
            let bitmap = mask.bitmap.as_ref().map(|b| {
                let d = b.dimensions();
                json!({ "width": d.width, "height": d.height })
            });
            out.insert(
                OVERLAY_KEY.to_owned(),
                json!({
                    "shape": mask.data.shape(),
                    "channels": mask.data.channels(),
                    "elementType": mask.data.element_type(),
                    "bitmap": bitmap,
                }),
            );
        }
        out.insert(
            RENDER_STATUS_KEY.to_owned(),
            serde_json::to_value(self.render_status).unwrap_or(Value::Null),
        );
        Value::Object(out)
    }

    /// An attribute rendered as text, for color keys.
    #[must_use]
    pub fn attribute_string(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Stable identity key used by instance coloring.
    ///
    /// `label.index` when both are present, otherwise the label id.
    #[must_use]
    pub fn instance_key(&self) -> String {
        match (&self.label, self.index) {
            (Some(label), Some(index)) => format!("{label}.{index}"),
            _ => self.id.clone().unwrap_or_default(),
        }
    }
}

/// Accept both a bare base64 string and an extended-JSON binary wrapper.
fn inline_payload(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o
            .get("$binary")
            .and_then(|b| b.get("base64").or(Some(b)))
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("$oid").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

/// A `Detections` container.
#[derive(Debug, Default)]
pub struct Detections {
    /// Child detections, each processed independently.
    pub detections: Vec<DenseLabel>,
    /// Every other key of the container object.
    pub attributes: Map<String, Value>,
}

/// A parsed dense label of a known class.
#[derive(Debug)]
pub enum Label {
    Detection(DenseLabel),
    Detections(Detections),
    Heatmap(DenseLabel),
    Segmentation(DenseLabel),
}

impl Label {
    /// Parse a dense label of class `class`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::NotDense`] for classes without masks and
    /// [`LabelError::NotAnObject`] for malformed values.
    pub fn from_json(class: LabelClass, value: Value) -> Result<Self, LabelError> {
        Ok(match class {
            LabelClass::Detection => Self::Detection(DenseLabel::from_json(value, OverlayField::MASK)?),
            LabelClass::Heatmap => Self::Heatmap(DenseLabel::from_json(value, OverlayField::MAP)?),
            LabelClass::Segmentation => {
                Self::Segmentation(DenseLabel::from_json(value, OverlayField::MASK)?)
            }
            LabelClass::Detections => {
                let Value::Object(mut attributes) = value else {
                    return Err(LabelError::NotAnObject);
                };
                let children = match attributes.remove("detections") {
                    Some(Value::Array(children)) => children,
                    _ => Vec::new(),
                };
                let detections = children
                    .into_iter()
                    .map(|child| DenseLabel::from_json(child, OverlayField::MASK))
                    .collect::<Result<_, _>>()?;
                Self::Detections(Detections {
                    detections,
                    attributes,
                })
            }
            other => return Err(LabelError::NotDense(other)),
        })
    }

    /// Class of this label.
    #[must_use]
    pub const fn class(&self) -> LabelClass {
        match self {
            Self::Detection(_) => LabelClass::Detection,
            Self::Detections(_) => LabelClass::Detections,
            Self::Heatmap(_) => LabelClass::Heatmap,
            Self::Segmentation(_) => LabelClass::Segmentation,
        }
    }

    /// Mask field names for this label (children's for `Detections`).
    #[must_use]
    pub const fn overlay_field(&self) -> OverlayField {
        match self {
            Self::Heatmap(_) => OverlayField::MAP,
            _ => OverlayField::MASK,
        }
    }

    /// Every dense label, flattening `Detections`.
    #[must_use]
    pub fn dense(&self) -> Vec<&DenseLabel> {
        match self {
            Self::Detection(l) | Self::Heatmap(l) | Self::Segmentation(l) => vec![l],
            Self::Detections(d) => d.detections.iter().collect(),
        }
    }

    /// Mutable access to every dense label, flattening `Detections`.
    pub fn dense_mut(&mut self) -> Vec<&mut DenseLabel> {
        match self {
            Self::Detection(l) | Self::Heatmap(l) | Self::Segmentation(l) => vec![l],
            Self::Detections(d) => d.detections.iter_mut().collect(),
        }
    }

    /// Write the label back to JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let field = self.overlay_field();
        match self {
            Self::Detection(l) | Self::Heatmap(l) | Self::Segmentation(l) => l.to_json(field),
            Self::Detections(d) => {
                let mut out = d.attributes.clone();
                out.insert(
                    "detections".to_owned(),
                    Value::Array(d.detections.iter().map(|l| l.to_json(field)).collect()),
                );
                Value::Object(out)
            }
        }
    }
}
