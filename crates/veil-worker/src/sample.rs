//! Sample label trees.
//!
//! A sample arrives as a JSON object. Dense label fields that are
//! active are lifted out into typed [`Label`]s so the loader and
//! painters can work on them; everything else stays as raw JSON and is
//! written back unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use veil_pipeline::{Label, LabelClass};

use crate::error::WorkerError;

/// Field schema, keyed by field name.
pub type Schema = BTreeMap<String, SchemaField>;

/// Schema entry for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaField {
    /// Fully qualified document class, e.g. `fiftyone.core.labels.Segmentation`.
    pub embedded_doc_type: Option<String>,
    /// Sub-fields of an embedded document.
    pub fields: Option<Schema>,
}

/// A dense label lifted out of a sample.
#[derive(Debug)]
pub struct LabelField {
    /// Dotted field path used for coloring and `activePaths`.
    pub path: String,
    /// Object keys from the sample root to the label.
    pub keys: Vec<String>,
    /// The parsed label.
    pub label: Label,
}

/// A label that was not rendered, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedLabel {
    /// Field path.
    pub path: String,
    /// Label id, if the failure was for one label of the field.
    pub label_id: Option<String>,
    /// Display form of the error.
    pub reason: String,
}

impl SkippedLabel {
    /// Record `error` against `path`.
    #[must_use]
    pub fn new(path: &str, label_id: Option<String>, error: &impl std::fmt::Display) -> Self {
        Self {
            path: path.to_owned(),
            label_id,
            reason: error.to_string(),
        }
    }
}

/// A sample with its active dense labels parsed.
#[derive(Debug, Default)]
pub struct Sample {
    /// The sample JSON minus the lifted labels.
    pub rest: Map<String, Value>,
    /// Active dense labels, in document order.
    pub labels: Vec<LabelField>,
}

impl Sample {
    /// Lift the dense labels of `value` whose paths are in `active_paths`.
    ///
    /// `prefix` is prepended to every path, e.g. `frames` for video
    /// frames. Labels of unknown class or unparsable shape are left in
    /// place and reported as skipped.
    #[must_use]
    pub fn from_json(
        value: Value,
        schema: &Schema,
        prefix: &str,
        active_paths: &[String],
    ) -> (Self, Vec<SkippedLabel>) {
        let Value::Object(mut rest) = value else {
            return (Self::default(), Vec::new());
        };
        let mut walk = Walk {
            active_paths,
            labels: Vec::new(),
            skipped: Vec::new(),
        };
        walk.object(&mut rest, Some(schema), prefix, &[]);
        (
            Self {
                rest,
                labels: walk.labels,
            },
            walk.skipped,
        )
    }

    /// Write the sample back, labels included.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut root = self.rest.clone();
        for field in &self.labels {
            insert_at(&mut root, &field.keys, field.label.to_json());
        }
        Value::Object(root)
    }

    /// Number of lifted labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if no labels were lifted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

struct Walk<'a> {
    active_paths: &'a [String],
    labels: Vec<LabelField>,
    skipped: Vec<SkippedLabel>,
}

impl Walk<'_> {
    fn object(
        &mut self,
        object: &mut Map<String, Value>,
        schema: Option<&Schema>,
        prefix: &str,
        keys: &[String],
    ) {
        let names: Vec<String> = object.keys().cloned().collect();
        for name in names {
            let field_schema = schema.and_then(|s| s.get(&name));
            let Some(class_name) = object
                .get(&name)
                .and_then(|v| v.get("_cls"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| field_schema.and_then(|f| f.embedded_doc_type.clone()))
            else {
                continue;
            };
            let path = join(prefix, &name);
            let mut field_keys = keys.to_vec();
            field_keys.push(name.clone());

            let class = match class_name.parse::<LabelClass>() {
                Ok(class) => class,
                Err(_) if self.active_paths.contains(&path) => {
                    let error = WorkerError::UnknownLabelClass(class_name);
                    tracing::warn!(field = %path, "{error}");
                    self.skipped.push(SkippedLabel::new(&path, None, &error));
                    continue;
                }
                Err(_) => continue,
            };

            if class == LabelClass::EmbeddedDocument {
                if let Some(Value::Object(inner)) = object.get_mut(&name) {
                    let inner_schema = field_schema.and_then(|f| f.fields.as_ref());
                    self.object(inner, inner_schema, &path, &field_keys);
                }
                continue;
            }
            if !class.is_dense() || !self.active_paths.contains(&path) {
                continue;
            }

            let Some(value) = object.remove(&name) else {
                continue;
            };
            match Label::from_json(class, value.clone()) {
                Ok(label) => self.labels.push(LabelField {
                    path,
                    keys: field_keys,
                    label,
                }),
                Err(error) => {
                    tracing::warn!(field = %path, "cannot read label: {error}");
                    self.skipped.push(SkippedLabel::new(&path, None, &error));
                    object.insert(name, value);
                }
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

fn insert_at(root: &mut Map<String, Value>, keys: &[String], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut object = root;
    for key in parents {
        let entry = object
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(inner) = entry else {
            return;
        };
        object = inner;
    }
    object.insert(last.clone(), value);
}
