use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use civicmap_common::{Address, AddressKey, GeoPoint, GeocodeError};
use tracing::debug;

use crate::AddressResolver;

/// Caches successful resolutions by normalized address.
///
/// Failures are never cached, so a provider outage or a typo'd address is retried
/// on the next request. When full, the oldest entry is evicted.
pub struct CachedResolver<R> {
    inner: R,
    capacity: usize,
    entries: Mutex<CacheEntries>,
}

#[derive(Default)]
struct CacheEntries {
    points: HashMap<AddressKey, GeoPoint>,
    order: VecDeque<AddressKey>,
}

impl<R: AddressResolver> CachedResolver<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            entries: Mutex::new(CacheEntries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheEntries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: AddressKey, point: GeoPoint) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        if entries.points.insert(key.clone(), point).is_none() {
            entries.order.push_back(key);
        }
        while entries.points.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.points.remove(&oldest);
        }
    }
}

#[async_trait]
impl<R: AddressResolver> AddressResolver for CachedResolver<R> {
    async fn resolve(&self, address: &Address) -> Result<GeoPoint, GeocodeError> {
        let key = address.key();
        let hit = self.lock().points.get(&key).copied();
        if let Some(point) = hit {
            debug!(address = %key, "Geocode cache hit");
            return Ok(point);
        }

        let point = self.inner.resolve(address).await?;
        self.insert(key, point);
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingResolver {
        fn new(fail: bool) -> Self {
            Self { calls: AtomicUsize::new(0), fail }
        }
    }

    #[async_trait]
    impl AddressResolver for CountingResolver {
        async fn resolve(&self, _address: &Address) -> Result<GeoPoint, GeocodeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GeocodeError::ProviderUnavailable);
            }
            Ok(GeoPoint::new(40.0 + n as f64, -74.0))
        }
    }

    #[tokio::test]
    async fn repeated_address_hits_cache() {
        let cached = CachedResolver::new(CountingResolver::new(false), 8);
        let a = cached.resolve(&Address::new("10 Jay St").with_borough("Brooklyn")).await.unwrap();
        let b = cached.resolve(&Address::new("10  JAY st").with_borough("brooklyn")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cached = CachedResolver::new(CountingResolver::new(true), 8);
        let addr = Address::new("nowhere");
        assert!(cached.resolve(&addr).await.is_err());
        assert!(cached.resolve(&addr).await.is_err());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty());
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted() {
        let cached = CachedResolver::new(CountingResolver::new(false), 2);
        for text in ["a st", "b st", "c st"] {
            cached.resolve(&Address::new(text)).await.unwrap();
        }
        assert_eq!(cached.len(), 2);
        cached.resolve(&Address::new("a st")).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 4);
    }
}
