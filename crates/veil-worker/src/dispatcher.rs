//! The worker actor.
//!
//! One inbound channel of [`Request`]s, one outbound channel of
//! [`Response`]s. The actor loop only routes: sample processing and
//! chunk reads run in spawned tasks so `resolveColor` replies keep
//! flowing while painters wait on them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use veil_fetch::{FetchPool, FetchSettings, Transport};
use veil_pipeline::ScaleCache;

use crate::cache::MaskCache;
use crate::color::{ColorService, ColorServiceHandle};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::process::Renderer;
use crate::protocol::{
    FrameChunkResponse, ProcessSampleRequest, ProcessedSample, RenderParams, Request, Response,
    SetStreamRequest,
};
use crate::stream::{FrameSource, FrameStream, HttpFrameSource, StreamParams};

/// Sends messages to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl WorkerHandle {
    /// Queue a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Closed`] if the worker has stopped.
    pub fn post(&self, request: Request) -> Result<(), WorkerError> {
        self.requests.send(request).map_err(|_| WorkerError::Closed)
    }

    /// Parse and queue a JSON message.
    ///
    /// Unknown methods and malformed messages are logged and dropped;
    /// the error is returned for callers that want it, and the worker
    /// keeps running either way.
    ///
    /// # Errors
    ///
    /// Returns the parse error, or [`WorkerError::Closed`] if the
    /// worker has stopped.
    pub fn post_json(&self, text: &str) -> Result<(), WorkerError> {
        match Request::from_json(text) {
            Ok(request) => self.post(request),
            Err(error) => {
                tracing::warn!("dropping message: {error}");
                Err(error)
            }
        }
    }
}

/// A configured worker, ready to spawn.
pub struct Worker {
    config: WorkerConfig,
    transport: Arc<dyn Transport>,
    frame_source: Option<Arc<dyn FrameSource>>,
}

impl Worker {
    /// A worker fetching through `transport`.
    #[must_use]
    pub fn new(config: WorkerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            frame_source: None,
        }
    }

    /// Pull frame chunks from `source` instead of the `/frames` route.
    #[must_use]
    pub fn with_frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// Start the actor and its color service on the current runtime.
    ///
    /// Returns the request handle, the outbound message stream and the
    /// actor task, which ends once every handle is dropped.
    #[must_use]
    pub fn spawn(self) -> (WorkerHandle, mpsc::UnboundedReceiver<Response>, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (color_service, colors) = ColorService::new(outbound_tx.clone(), self.config.color_timeout);
        tokio::spawn(color_service.run());

        let pool = FetchPool::new(
            Arc::clone(&self.transport),
            self.config.max_concurrent_fetches,
            self.config.retry,
        );
        let state = State {
            config: self.config,
            transport: self.transport,
            frame_source: self.frame_source,
            pool,
            fetch: Arc::new(FetchSettings::default()),
            colors,
            scales: Arc::new(ScaleCache::default()),
            masks: Arc::new(MaskCache::new(self.config.mask_cache_capacity)),
            stream: None,
            outbound: outbound_tx,
        };
        let task = tokio::spawn(state.run(request_rx));
        (
            WorkerHandle {
                requests: request_tx,
            },
            outbound_rx,
            task,
        )
    }
}

struct State {
    config: WorkerConfig,
    transport: Arc<dyn Transport>,
    frame_source: Option<Arc<dyn FrameSource>>,
    pool: FetchPool,
    fetch: Arc<FetchSettings>,
    colors: ColorServiceHandle,
    scales: Arc<ScaleCache>,
    masks: Arc<MaskCache>,
    stream: Option<FrameStream>,
    outbound: mpsc::UnboundedSender<Response>,
}

impl State {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        tracing::info!("worker started");
        while let Some(request) = requests.recv().await {
            self.handle(request);
        }
        if let Some(stream) = self.stream.take() {
            stream.cancel();
        }
        self.pool.close();
        tracing::info!("worker stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Init(settings) => {
                tracing::info!(origin = %settings.origin, prefix = %settings.path_prefix, "init");
                self.fetch = Arc::new(settings);
                self.masks.clear();
            }
            Request::ProcessSample(request) => self.process_sample(request),
            Request::SetStream(request) => self.set_stream(request),
            Request::RequestFrameChunk { uuid } => self.request_frame_chunk(uuid),
            Request::ResolveColor { key, seed, color } => self.colors.fulfill(key, seed, color),
        }
    }

    fn renderer(&self, params: RenderParams) -> Renderer<ColorServiceHandle> {
        Renderer::new(
            self.pool.clone(),
            Arc::clone(&self.fetch),
            params,
            self.colors.clone(),
            Arc::clone(&self.scales),
            Arc::clone(&self.masks),
        )
    }

    fn process_sample(&self, request: ProcessSampleRequest) {
        let ProcessSampleRequest {
            sample,
            params,
            uuid,
        } = request;
        let renderer = self.renderer(params);
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let (sample, skipped) = renderer.render(sample, "").await;
            let response = Response::ProcessSample(ProcessedSample {
                sample,
                skipped,
                uuid,
            });
            if outbound.send(response).is_err() {
                tracing::debug!("consumer is gone; dropping processed sample");
            }
        });
    }

    fn set_stream(&mut self, request: SetStreamRequest) {
        if let Some(previous) = self.stream.take() {
            tracing::debug!(uuid = previous.uuid(), "superseding stream");
            previous.cancel();
        }
        let params = StreamParams {
            sample_id: request.sample_id,
            dataset: request.dataset,
            view: request.view,
            slice: request.slice,
            frame_number: request.frame_number,
            frame_count: request.frame_count,
            chunk_size: request.chunk_size.unwrap_or(self.config.default_chunk_size),
        };
        let source: Arc<dyn FrameSource> = match &self.frame_source {
            Some(source) => Arc::clone(source),
            None => Arc::new(HttpFrameSource::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.fetch),
                self.config.retry,
            )),
        };
        tracing::debug!(uuid = %request.uuid, frames = params.frame_count, "starting stream");
        let renderer = self.renderer(request.params);
        self.stream = Some(FrameStream::spawn(
            request.uuid,
            params,
            source,
            renderer,
            self.config.stream_high_water_mark,
        ));
    }

    fn request_frame_chunk(&self, uuid: String) {
        let Some(stream) = self.stream.as_ref().filter(|s| s.uuid() == uuid) else {
            tracing::debug!(%uuid, "no stream for chunk request");
            return;
        };
        let reader = stream.reader();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let response = match reader.next().await {
                None => return,
                Some(Err(WorkerError::StreamCancelled)) => {
                    tracing::debug!(%uuid, "stream cancelled before chunk was ready");
                    return;
                }
                Some(Ok(chunk)) => Response::FrameChunk(FrameChunkResponse {
                    frames: chunk.frames,
                    range: chunk.range,
                    skipped: chunk.skipped,
                    uuid,
                }),
                Some(Err(error)) => Response::error(&error, Some(uuid)),
            };
            if outbound.send(response).is_err() {
                tracing::debug!("consumer is gone; dropping frame chunk");
            }
        });
    }
}
