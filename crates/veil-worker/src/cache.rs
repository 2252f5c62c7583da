//! Decoded masks kept across requests.
//!
//! Samples arrive as JSON with every `processSample`, so the typed
//! masks of an earlier pass are gone by the time a recolor comes in.
//! The loader records every fetched mask here under its resolved URL
//! and decode route, and consults the cache before fetching again.
//! Entries are evicted oldest first once `capacity` is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use veil_pipeline::OverlayMask;

/// Identity of a fetched mask: where it came from and how it was decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskKey {
    /// Resolved media URL.
    pub url: String,
    /// Whether the palette route was taken for an indexed PNG.
    pub indexed: bool,
}

/// Bounded, thread-safe store of decoded masks.
#[derive(Debug)]
pub struct MaskCache {
    capacity: usize,
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    masks: HashMap<MaskKey, OverlayMask>,
    order: VecDeque<MaskKey>,
}

impl MaskCache {
    /// A cache holding at most `capacity` masks. Zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Entries::default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the mask stored under `key`.
    #[must_use]
    pub fn get(&self, key: &MaskKey) -> Option<OverlayMask> {
        self.entries().masks.get(key).cloned()
    }

    /// Store `mask` under `key`, evicting the oldest entries past capacity.
    pub fn insert(&self, key: MaskKey, mask: OverlayMask) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries();
        if entries.masks.insert(key.clone(), mask).is_none() {
            entries.order.push_back(key);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.masks.remove(&oldest);
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries();
        entries.masks.clear();
        entries.order.clear();
    }

    /// Number of cached masks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().masks.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use veil_pipeline::ElementType;

    use super::*;

    fn key(url: &str) -> MaskKey {
        MaskKey {
            url: url.to_owned(),
            indexed: false,
        }
    }

    fn mask(value: u8) -> OverlayMask {
        OverlayMask::new(vec![value], 0, ElementType::Uint8, [1, 1], 1).unwrap()
    }

    #[test]
    fn evicts_oldest_first() {
        let cache = MaskCache::new(2);
        cache.insert(key("a"), mask(1));
        cache.insert(key("b"), mask(2));
        cache.insert(key("a"), mask(3));
        cache.insert(key("c"), mask(4));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.get(&key("b")).unwrap().as_bytes(), &[2]);
        assert_eq!(cache.get(&key("c")).unwrap().as_bytes(), &[4]);
    }

    #[test]
    fn route_is_part_of_the_key() {
        let cache = MaskCache::new(4);
        cache.insert(key("a"), mask(1));
        let indexed = MaskKey {
            indexed: true,
            ..key("a")
        };
        assert!(cache.get(&indexed).is_none());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = MaskCache::new(0);
        cache.insert(key("a"), mask(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = MaskCache::new(4);
        cache.insert(key("a"), mask(1));
        cache.clear();
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
    }
}
