//! Message protocol.
//!
//! Every message is a JSON object tagged by its `method` field.
//!
//! Inbound:
//! - `init`: `origin`, `headers`, `pathPrefix` for the media server
//! - `processSample`: a sample plus its coloring inputs and `uuid`
//! - `setStream`: start streaming frames of a video sample
//! - `requestFrameChunk`: pull the next processed chunk of the stream
//! - `resolveColor`: answer a `requestColor`
//!
//! Outbound:
//! - `processSample`: the sample with rendered labels, plus skipped labels
//! - `frameChunk`: processed frames and the frame range they cover
//! - `requestColor`: ask the consumer for a color
//! - `error`: a stream-level failure as an [`ErrorEnvelope`]
//!
//! Bitmaps ride inside the outbound [`Sample`]s and are moved, not
//! copied, to the consumer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veil_fetch::FetchSettings;
use veil_pipeline::ColorSettings;
use veil_pipeline::coloring::{Coloring, CustomizeColor, FieldColorscale, LabelTagColors};

use crate::error::{ErrorEnvelope, WorkerError};
use crate::sample::{Sample, Schema, SkippedLabel};

/// Methods the worker accepts.
pub const METHODS: [&str; 5] = [
    "init",
    "processSample",
    "setStream",
    "requestFrameChunk",
    "resolveColor",
];

/// Coloring and selection inputs shared by samples and streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderParams {
    pub coloring: Coloring,
    pub customize_color_setting: Vec<CustomizeColor>,
    pub colorscale: Vec<FieldColorscale>,
    pub label_tag_colors: LabelTagColors,
    pub selected_label_tags: Vec<String>,
    pub schema: Schema,
    /// Field paths to render; all other labels pass through.
    pub active_paths: Vec<String>,
    /// Explicit media URLs keyed by `{field path}.{disk field}`.
    pub sources: BTreeMap<String, String>,
}

impl RenderParams {
    /// The painter-facing color settings.
    #[must_use]
    pub fn color_settings(&self) -> ColorSettings {
        ColorSettings {
            coloring: self.coloring.clone(),
            customize: self.customize_color_setting.clone(),
            colorscales: self.colorscale.clone(),
            label_tag_colors: self.label_tag_colors.clone(),
            selected_label_tags: self.selected_label_tags.clone(),
        }
    }
}

/// `processSample` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSampleRequest {
    pub sample: Value,
    #[serde(flatten)]
    pub params: RenderParams,
    pub uuid: String,
}

/// `setStream` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStreamRequest {
    pub sample_id: String,
    pub dataset: String,
    #[serde(default)]
    pub view: Value,
    #[serde(default)]
    pub slice: Option<String>,
    /// First frame to stream.
    #[serde(default = "first_frame")]
    pub frame_number: u64,
    /// Total frames in the video.
    pub frame_count: u64,
    /// Frames per chunk; the worker default when absent.
    #[serde(default)]
    pub chunk_size: Option<u32>,
    #[serde(flatten)]
    pub params: RenderParams,
    pub uuid: String,
}

const fn first_frame() -> u64 {
    1
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Request {
    Init(FetchSettings),
    ProcessSample(ProcessSampleRequest),
    SetStream(SetStreamRequest),
    RequestFrameChunk { uuid: String },
    ResolveColor { key: String, seed: u64, color: String },
}

impl Request {
    /// Parse a message, distinguishing unknown methods from malformed
    /// known ones.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::UnknownMethod`] when `method` is missing
    /// or unknown and [`WorkerError::Protocol`] when the payload does
    /// not fit its method.
    pub fn from_json(text: &str) -> Result<Self, WorkerError> {
        let value: Value = serde_json::from_str(text)?;
        let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
        if !METHODS.contains(&method) {
            return Err(WorkerError::UnknownMethod(method.to_owned()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Outbound `processSample` result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedSample {
    pub sample: Sample,
    pub skipped: Vec<SkippedLabel>,
    pub uuid: String,
}

/// Outbound `frameChunk`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameChunkResponse {
    pub frames: Vec<Sample>,
    /// Inclusive frame numbers covered by `frames`.
    pub range: [u64; 2],
    pub skipped: Vec<SkippedLabel>,
    pub uuid: String,
}

/// An outbound message.
#[derive(Debug, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Response {
    ProcessSample(ProcessedSample),
    FrameChunk(FrameChunkResponse),
    RequestColor {
        key: String,
        seed: u64,
        pool: Vec<String>,
    },
    Error {
        error: ErrorEnvelope,
        uuid: Option<String>,
    },
}

impl Response {
    /// Wrap a stream failure for `uuid`.
    #[must_use]
    pub fn error(error: &WorkerError, uuid: Option<String>) -> Self {
        Self::Error {
            error: error.into(),
            uuid,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use serde_json::json;
    use veil_pipeline::ColorMode;

    use super::*;

    #[test]
    fn parses_init() {
        let request =
            Request::from_json(r#"{"method":"init","origin":"http://h:1","pathPrefix":"/p"}"#)
                .unwrap();
        let Request::Init(settings) = request else {
            panic!("expected init");
        };
        assert_eq!(settings.origin, "http://h:1");
        assert_eq!(settings.path_prefix, "/p");
    }

    #[test]
    fn parses_process_sample() {
        let text = json!({
            "method": "processSample",
            "sample": {"_id": "s"},
            "coloring": {"by": "value", "pool": ["#ff0000"], "seed": 3},
            "customizeColorSetting": [{"path": "gt", "fieldColor": "#00ff00"}],
            "activePaths": ["gt"],
            "sources": {"gt.mask_path": "http://cdn/m.png"},
            "uuid": "u1"
        })
        .to_string();
        let Request::ProcessSample(request) = Request::from_json(&text).unwrap() else {
            panic!("expected processSample");
        };
        assert_eq!(request.uuid, "u1");
        assert_eq!(request.params.coloring.mode, ColorMode::Value);
        assert_eq!(request.params.active_paths, vec!["gt".to_owned()]);
        let settings = request.params.color_settings();
        assert_eq!(settings.customize.len(), 1);
        assert_eq!(settings.coloring.seed, 3);
    }

    #[test]
    fn parses_set_stream_with_defaults() {
        let text = json!({
            "method": "setStream",
            "sampleId": "s",
            "dataset": "d",
            "frameCount": 40,
            "uuid": "u"
        })
        .to_string();
        let Request::SetStream(request) = Request::from_json(&text).unwrap() else {
            panic!("expected setStream");
        };
        assert_eq!(request.frame_number, 1);
        assert_eq!(request.chunk_size, None);
        assert_eq!(request.view, Value::Null);
    }

    #[test]
    fn unknown_method_is_distinguished() {
        let err = Request::from_json(r#"{"method":"launch"}"#).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownMethod(m) if m == "launch"));
        let err = Request::from_json(r#"{"method":"resolveColor","key":1}"#).unwrap_err();
        assert!(matches!(err, WorkerError::Protocol(_)));
    }

    #[test]
    fn request_color_wire_shape() {
        let response = Response::RequestColor {
            key: "cat".into(),
            seed: 2,
            pool: vec!["#fff".into()],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"method": "requestColor", "key": "cat", "seed": 2, "pool": ["#fff"]})
        );
    }

    #[test]
    fn error_wire_shape() {
        let response = Response::error(&WorkerError::StreamCancelled, Some("u".into()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["method"], "error");
        assert_eq!(json["error"]["cls"], "StreamCancelled");
        assert_eq!(json["uuid"], "u");
    }
}
