//! Frame streaming.
//!
//! A [`FrameStream`] pulls chunks of frames for one video sample from a
//! [`FrameSource`], renders every frame of a chunk, and buffers the
//! result for the consumer. The buffer holds at most the high-water
//! mark of chunks, counting the one being fetched, so a stalled
//! consumer stops the pulls. Cancellation is final: a cancelled stream
//! never pulls again and discards any fetch that completes late.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use veil_fetch::{FetchSettings, RetryPolicy, Transport, fetch_with_linear_backoff};
use veil_pipeline::ColorResolver;

use crate::error::WorkerError;
use crate::process::Renderer;
use crate::sample::{Sample, SkippedLabel};

/// Field path prefix of frame labels.
pub const FRAMES_PREFIX: &str = "frames";

/// Body of `POST /frames`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameChunkRequest {
    /// First frame of the chunk.
    pub frame_number: u64,
    /// Frames requested.
    pub num_frames: u32,
    /// Total frames in the video.
    pub frame_count: u64,
    pub sample_id: String,
    pub dataset: String,
    pub view: Value,
    pub slice: Option<String>,
}

/// Response of `POST /frames`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameChunk {
    /// Frame documents.
    pub frames: Vec<Value>,
    /// Inclusive frame numbers covered.
    pub range: [u64; 2],
}

/// Where frame chunks come from.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fetch one chunk.
    async fn fetch_chunk(&self, request: &FrameChunkRequest) -> Result<FrameChunk, WorkerError>;
}

/// [`FrameSource`] backed by the media server's `/frames` route.
pub struct HttpFrameSource {
    transport: Arc<dyn Transport>,
    settings: Arc<FetchSettings>,
    policy: RetryPolicy,
}

impl HttpFrameSource {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<FetchSettings>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            settings,
            policy,
        }
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch_chunk(&self, request: &FrameChunkRequest) -> Result<FrameChunk, WorkerError> {
        let http = self.settings.post_json("/frames", request)?;
        let response = fetch_with_linear_backoff(self.transport.as_ref(), &http, &self.policy).await?;
        Ok(response.json()?)
    }
}

/// What to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_id: String,
    pub dataset: String,
    pub view: Value,
    pub slice: Option<String>,
    /// First frame to pull.
    pub frame_number: u64,
    pub frame_count: u64,
    pub chunk_size: u32,
}

/// A chunk with every frame rendered.
#[derive(Debug)]
pub struct ProcessedChunk {
    pub frames: Vec<Sample>,
    pub range: [u64; 2],
    pub skipped: Vec<SkippedLabel>,
}

/// A running frame stream.
#[derive(Debug)]
pub struct FrameStream {
    uuid: String,
    chunks: Arc<Mutex<mpsc::Receiver<Result<ProcessedChunk, WorkerError>>>>,
    cancel: CancellationToken,
}

impl FrameStream {
    /// Start pulling chunks in a background task.
    ///
    /// `high_water_mark` is clamped to at least one chunk.
    pub fn spawn<R>(
        uuid: String,
        params: StreamParams,
        source: Arc<dyn FrameSource>,
        renderer: Renderer<R>,
        high_water_mark: usize,
    ) -> Self
    where
        R: ColorResolver + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        let cancel = CancellationToken::new();
        tokio::spawn(pull(params, source, renderer, tx, cancel.clone()));
        Self {
            uuid,
            chunks: Arc::new(Mutex::new(rx)),
            cancel,
        }
    }

    /// Id of the `setStream` request that started this stream.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Stop the stream for good.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the stream has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle that reads chunks without borrowing the stream.
    #[must_use]
    pub fn reader(&self) -> ChunkReader {
        ChunkReader {
            chunks: Arc::clone(&self.chunks),
            cancel: self.cancel.clone(),
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reads the next processed chunk of a stream.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    chunks: Arc<Mutex<mpsc::Receiver<Result<ProcessedChunk, WorkerError>>>>,
    cancel: CancellationToken,
}

impl ChunkReader {
    /// Wait for the next chunk. `None` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::StreamCancelled`] if the stream is
    /// cancelled before a chunk is available, and the pull error if
    /// fetching the chunk failed.
    pub async fn next(&self) -> Option<Result<ProcessedChunk, WorkerError>> {
        let mut chunks = self.chunks.lock().await;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(Err(WorkerError::StreamCancelled)),
            chunk = chunks.recv() => {
                if self.cancel.is_cancelled() {
                    Some(Err(WorkerError::StreamCancelled))
                } else {
                    chunk
                }
            }
        }
    }
}

#[tracing::instrument(skip_all, fields(sample = %params.sample_id))]
async fn pull<R: ColorResolver>(
    params: StreamParams,
    source: Arc<dyn FrameSource>,
    renderer: Renderer<R>,
    tx: mpsc::Sender<Result<ProcessedChunk, WorkerError>>,
    cancel: CancellationToken,
) {
    let mut cursor = params.frame_number.max(1);
    while cursor <= params.frame_count {
        let permit = tokio::select! {
            () = cancel.cancelled() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let request = FrameChunkRequest {
            frame_number: cursor,
            num_frames: params.chunk_size.max(1),
            frame_count: params.frame_count,
            sample_id: params.sample_id.clone(),
            dataset: params.dataset.clone(),
            view: params.view.clone(),
            slice: params.slice.clone(),
        };
        let fetched = tokio::select! {
            () = cancel.cancelled() => break,
            fetched = source.fetch_chunk(&request) => fetched,
        };
        if cancel.is_cancelled() {
            break;
        }

        let chunk = match fetched {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::error!(frame = cursor, "frame chunk failed: {error}");
                permit.send(Err(error));
                break;
            }
        };

        let range = chunk.range;
        let mut frames = Vec::with_capacity(chunk.frames.len());
        let mut skipped = Vec::new();
        for frame in chunk.frames {
            let (sample, frame_skipped) = renderer.render(frame, FRAMES_PREFIX).await;
            frames.push(sample);
            skipped.extend(frame_skipped);
        }
        if cancel.is_cancelled() {
            break;
        }
        tracing::debug!(?range, frames = frames.len(), "chunk ready");
        permit.send(Ok(ProcessedChunk {
            frames,
            range,
            skipped,
        }));
        let Some(next) = range[1].max(cursor).checked_add(1) else {
            break;
        };
        cursor = next;
    }
    tracing::debug!(cancelled = cancel.is_cancelled(), "stream finished");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use veil_fetch::{FetchError, FetchPool};
    use veil_pipeline::{PaletteResolver, ScaleCache};

    use super::*;
    use crate::cache::MaskCache;
    use crate::loader::tests::{FakeServer, gray_png, ok, settings};
    use crate::protocol::RenderParams;

    /// Serves `frame_count` single-label frames and records requests.
    struct FakeFrames {
        requests: StdMutex<Vec<u64>>,
        fail: AtomicBool,
    }

    impl FakeFrames {
        fn new() -> Self {
            Self {
                requests: StdMutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn pulled(&self) -> Vec<u64> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSource for FakeFrames {
        async fn fetch_chunk(&self, request: &FrameChunkRequest) -> Result<FrameChunk, WorkerError> {
            self.requests.lock().unwrap().push(request.frame_number);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::NonRetryable { status: 404 }.into());
            }
            let end = (request.frame_number + u64::from(request.num_frames) - 1).min(request.frame_count);
            let frames = (request.frame_number..=end)
                .map(|n| json!({"frame_number": n, "gt": {"_cls": "Segmentation", "mask_path": "/m.png"}}))
                .collect();
            Ok(FrameChunk {
                frames,
                range: [request.frame_number, end],
            })
        }
    }

    fn renderer() -> Renderer<PaletteResolver> {
        let server = Arc::new(FakeServer::new(vec![("m.png", ok(gray_png(&[0, 2], 2, 1)))]));
        let pool = FetchPool::new(server, 4, RetryPolicy::default());
        let params = RenderParams {
            active_paths: vec!["frames.gt".to_owned()],
            ..RenderParams::default()
        };
        Renderer::new(
            pool,
            Arc::new(settings()),
            params,
            PaletteResolver,
            Arc::new(ScaleCache::default()),
            Arc::new(MaskCache::new(16)),
        )
    }

    fn stream_params(frame_count: u64, chunk_size: u32) -> StreamParams {
        StreamParams {
            sample_id: "s".into(),
            dataset: "d".into(),
            view: Value::Null,
            slice: None,
            frame_number: 1,
            frame_count,
            chunk_size,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streams_every_chunk_in_order() {
        let source = Arc::new(FakeFrames::new());
        let stream = FrameStream::spawn("u".into(), stream_params(5, 2), source.clone(), renderer(), 2);
        let reader = stream.reader();

        let mut ranges = Vec::new();
        while let Some(chunk) = reader.next().await {
            let chunk = chunk.unwrap();
            for frame in &chunk.frames {
                let mask = frame.labels[0].label.dense()[0].mask.as_ref().unwrap();
                assert!(mask.bitmap.is_some());
            }
            ranges.push(chunk.range);
        }
        assert_eq!(ranges, vec![[1, 2], [3, 4], [5, 5]]);
        assert_eq!(source.pulled(), vec![1, 3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_stops_pulls_at_high_water_mark() {
        let source = Arc::new(FakeFrames::new());
        let stream = FrameStream::spawn("u".into(), stream_params(100, 1), source.clone(), renderer(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.pulled().len(), 2);

        let reader = stream.reader();
        reader.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.pulled().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stream_never_resumes() {
        let source = Arc::new(FakeFrames::new());
        let stream = FrameStream::spawn("u".into(), stream_params(100, 1), source.clone(), renderer(), 1);
        let reader = stream.reader();
        reader.next().await.unwrap().unwrap();

        stream.cancel();
        assert!(stream.is_cancelled());
        assert!(matches!(reader.next().await, Some(Err(WorkerError::StreamCancelled))));

        let pulled = source.pulled().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.pulled().len(), pulled);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_is_forwarded_once() {
        let source = Arc::new(FakeFrames::new());
        source.fail.store(true, Ordering::SeqCst);
        let stream = FrameStream::spawn("u".into(), stream_params(10, 5), source.clone(), renderer(), 2);
        let reader = stream.reader();

        let error = reader.next().await.unwrap().unwrap_err();
        assert!(matches!(error, WorkerError::Fetch(FetchError::NonRetryable { status: 404 })));
        assert!(reader.next().await.is_none());
        assert_eq!(source.pulled(), vec![1]);
    }

    /// Claims every remaining frame in one empty chunk.
    struct WholeRange;

    #[async_trait]
    impl FrameSource for WholeRange {
        async fn fetch_chunk(&self, request: &FrameChunkRequest) -> Result<FrameChunk, WorkerError> {
            Ok(FrameChunk {
                frames: Vec::new(),
                range: [request.frame_number, u64::MAX],
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn range_ending_at_last_frame_number_ends_stream() {
        let stream = FrameStream::spawn(
            "u".into(),
            stream_params(u64::MAX, 4),
            Arc::new(WholeRange),
            renderer(),
            2,
        );
        let reader = stream.reader();
        assert_eq!(reader.next().await.unwrap().unwrap().range, [1, u64::MAX]);
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn chunk_request_wire_shape() {
        let request = FrameChunkRequest {
            frame_number: 21,
            num_frames: 20,
            frame_count: 90,
            sample_id: "s".into(),
            dataset: "d".into(),
            view: json!([]),
            slice: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "frameNumber": 21, "numFrames": 20, "frameCount": 90,
                "sampleId": "s", "dataset": "d", "view": [], "slice": null
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn http_source_posts_to_frames_route() {
        let body = serde_json::to_vec(&json!({"frames": [], "range": [1, 1]})).unwrap();
        let server = Arc::new(FakeServer::new(vec![("/frames", ok(body))]));
        let source = HttpFrameSource::new(server.clone(), Arc::new(settings()), RetryPolicy::default());
        let chunk = source
            .fetch_chunk(&FrameChunkRequest {
                frame_number: 1,
                num_frames: 1,
                frame_count: 1,
                sample_id: "s".into(),
                dataset: "d".into(),
                view: Value::Null,
                slice: None,
            })
            .await
            .unwrap();
        assert_eq!(chunk.range, [1, 1]);
        assert_eq!(server.urls(), vec!["http://media/frames".to_owned()]);
    }
}
