//! veil-fetch: retrying, concurrency-bounded HTTP fetch.
//!
//! [`fetch_with_linear_backoff`] runs one request with a linear retry
//! schedule and fails fast on client errors. [`FetchPool`] queues
//! requests behind a process-wide admission limit and runs each through
//! the retry loop. The network itself sits behind the [`Transport`]
//! trait.

pub mod error;
pub mod pool;
pub mod retry;
pub mod settings;
pub mod transport;

pub use error::FetchError;
pub use pool::{DEFAULT_MAX_CONCURRENT, FetchPool};
pub use retry::{NON_RETRYABLE_STATUS, RetryPolicy, fetch_with_linear_backoff};
pub use settings::FetchSettings;
pub use transport::{HttpRequest, HttpResponse, Method, Priority, ReqwestTransport, Transport};
