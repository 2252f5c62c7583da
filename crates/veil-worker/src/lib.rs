//! veil-worker: message-driven overlay worker.
//!
//! Runs the overlay pipeline behind a channel protocol. A consumer
//! posts [`Request`]s and receives [`Response`]s:
//!
//! - `processSample` lifts a sample's active dense labels, loads their
//!   masks through a shared [`veil_fetch::FetchPool`], paints them and
//!   turns them into bitmaps, phase by phase.
//! - `setStream` / `requestFrameChunk` stream the frames of a video
//!   sample with bounded read-ahead.
//! - `requestColor` / `resolveColor` let the consumer own color choice;
//!   concurrent requests for one key share a single round trip.
//!
//! ```no_run
//! # async fn demo() {
//! use std::sync::Arc;
//! use veil_fetch::ReqwestTransport;
//! use veil_worker::{Worker, WorkerConfig};
//!
//! let worker = Worker::new(WorkerConfig::default(), Arc::new(ReqwestTransport::default()));
//! let (handle, mut responses, _task) = worker.spawn();
//! handle
//!     .post_json(r#"{"method":"init","origin":"http://localhost:5151"}"#)
//!     .ok();
//! while let Some(response) = responses.recv().await {
//!     println!("{}", serde_json::to_string(&response).unwrap_or_default());
//! }
//! # }
//! ```

pub mod cache;
pub mod color;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod process;
pub mod protocol;
pub mod sample;
pub mod stream;

pub use cache::{MaskCache, MaskKey};
pub use color::{ColorService, ColorServiceHandle};
pub use config::WorkerConfig;
pub use dispatcher::{Worker, WorkerHandle};
pub use error::{ErrorEnvelope, WorkerError};
pub use process::{Renderer, process_sample};
pub use protocol::{Request, Response};
pub use sample::{Sample, SkippedLabel};
pub use stream::{FrameSource, FrameStream, HttpFrameSource};
