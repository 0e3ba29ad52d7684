//! Address → coordinate resolution.
//!
//! `AddressResolver` is the seam to the external geocoding provider. Production code
//! uses [`NominatimResolver`], usually wrapped in a [`CachedResolver`]; tests plug in
//! a mock.

pub mod cache;
pub mod nominatim;

use std::sync::Arc;

use async_trait::async_trait;
use civicmap_common::{Address, GeoPoint, GeocodeError};

pub use cache::CachedResolver;
pub use nominatim::NominatimResolver;

/// Longest address text accepted by any resolver.
pub const MAX_ADDRESS_LEN: usize = 200;

#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve an address to its raw (not yet collision-resolved) coordinate.
    ///
    /// One provider call per invocation. Never returns a guessed coordinate:
    /// a miss is `NotFound`, any provider trouble is `ProviderUnavailable`.
    async fn resolve(&self, address: &Address) -> Result<GeoPoint, GeocodeError>;
}

#[async_trait]
impl<T: AddressResolver + ?Sized> AddressResolver for Arc<T> {
    async fn resolve(&self, address: &Address) -> Result<GeoPoint, GeocodeError> {
        (**self).resolve(address).await
    }
}
