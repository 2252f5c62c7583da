//! Worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use veil_fetch::RetryPolicy;

/// Default number of mask fetches in flight at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = veil_fetch::DEFAULT_MAX_CONCURRENT;

/// Default number of frame chunks buffered ahead of the consumer.
pub const DEFAULT_STREAM_HIGH_WATER_MARK: usize = 2;

/// Default wait for a `resolveColor` reply before falling back.
pub const DEFAULT_COLOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Default frames per chunk when a stream does not say.
pub const DEFAULT_CHUNK_SIZE: u32 = 20;

/// Default number of fetched masks kept for recoloring.
pub const DEFAULT_MASK_CACHE_CAPACITY: usize = 128;

/// Serde support for `Option<Duration>` as integer milliseconds.
mod optional_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Tunables for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// Admission limit of the shared fetch pool.
    pub max_concurrent_fetches: usize,
    /// Retry schedule for mask and frame fetches.
    pub retry: RetryPolicy,
    /// Frame chunks that may be buffered or in flight ahead of the consumer.
    pub stream_high_water_mark: usize,
    /// How long a painter waits for a color. `None` waits forever.
    #[serde(with = "optional_ms", rename = "colorTimeoutMs")]
    pub color_timeout: Option<Duration>,
    /// Frames per chunk when a stream request leaves it unset.
    pub default_chunk_size: u32,
    /// Fetched masks kept across requests. Zero disables the cache.
    pub mask_cache_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            retry: RetryPolicy::default(),
            stream_high_water_mark: DEFAULT_STREAM_HIGH_WATER_MARK,
            color_timeout: Some(DEFAULT_COLOR_TIMEOUT),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            mask_cache_capacity: DEFAULT_MASK_CACHE_CAPACITY,
        }
    }
}
