//! Concurrency-bounded fetch pool.
//!
//! A fair semaphore gates dispatch: at most `max_concurrent` requests
//! are in flight, and waiting requests are admitted in the order they
//! arrived. A request holds its slot through every retry attempt and
//! frees it on completion, success or failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use crate::error::FetchError;
use crate::retry::{RetryPolicy, fetch_with_linear_backoff};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Default number of requests allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 100;

/// A cloneable handle to a shared fetch queue.
#[derive(Clone)]
pub struct FetchPool {
    transport: Arc<dyn Transport>,
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    policy: RetryPolicy,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl std::fmt::Debug for FetchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPool")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Decrements the in-flight count when a dispatched request ends or is
/// dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FetchPool {
    /// Create a pool. `max_concurrent` is clamped to at least one.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, max_concurrent: usize, policy: RetryPolicy) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            transport,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            policy,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue `request`, wait for a slot, then fetch it with retries.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::PoolClosed`] if the pool was closed while
    /// waiting, and otherwise whatever the retrying fetch returns.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| FetchError::PoolClosed)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        tracing::trace!(url = %request.url, in_flight = now, "dispatching");
        fetch_with_linear_backoff(self.transport.as_ref(), &request, &self.policy).await
    }

    /// Requests currently dispatched.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed so far.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Admission limit.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop admitting requests. Queued requests fail with
    /// [`FetchError::PoolClosed`]; dispatched ones run to completion.
    pub fn close(&self) {
        self.slots.close();
    }
}
