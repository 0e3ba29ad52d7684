// Test doubles for the engine's two collaborator seams.
//
// - MockResolver (AddressResolver): HashMap-based address → point, optional delay
// - MemoryPostStore (PostStore): Vec-backed store with all-or-nothing writes
//
// Plus fixtures for building posts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use civicmap_common::{
    Address, AddressKey, Coordinate, CoordinateUpdate, GeoPoint, GeocodeError, Post, PostKind,
    PostStatus,
};
use civicmap_geocoder::AddressResolver;
use uuid::Uuid;

use crate::store::PostStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Park Slope, Brooklyn.
pub const PARK_SLOPE: GeoPoint = GeoPoint {
    lat: 40.6710,
    lng: -73.9814,
};
/// Astoria, Queens.
pub const ASTORIA: GeoPoint = GeoPoint {
    lat: 40.7644,
    lng: -73.9235,
};

pub const DEFAULT_OWNER: Uuid = Uuid::from_u128(1000);

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn default_address() -> Address {
    Address::new("441 7th Ave")
        .with_borough("Brooklyn")
        .with_zipcode("11215")
}

/// An unplaced issue with id `n`, created `n` minutes after [`base_time`].
pub fn post(n: u128, title: &str) -> Post {
    Post {
        id: Uuid::from_u128(n),
        title: title.to_string(),
        description: String::new(),
        kind: PostKind::Issue,
        status: PostStatus::Active,
        created_at: base_time() + ChronoDuration::minutes(n as i64),
        owner_id: DEFAULT_OWNER,
        address: default_address(),
        coordinate: Coordinate::Unresolved,
        upvote_count: 0,
        comment_count: 0,
        upvoters: Default::default(),
    }
}

/// A post already placed with `raw == display == point`.
pub fn placed_post(n: u128, title: &str, point: GeoPoint) -> Post {
    Post {
        coordinate: Coordinate::Placed {
            raw: point,
            display: point,
        },
        ..post(n, title)
    }
}

pub fn event(n: u128, title: &str) -> Post {
    Post {
        kind: PostKind::Event,
        ..post(n, title)
    }
}

/// Install a test-writer subscriber once; honors `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("civicmap_engine=debug,civicmap_geocoder=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// HashMap-based resolver. Unregistered addresses resolve to `NotFound`.
/// Builder pattern: `.on_address()`, `.on_error()`, `.with_delay()`.
#[derive(Default)]
pub struct MockResolver {
    responses: HashMap<AddressKey, Result<GeoPoint, GeocodeError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_address(mut self, address: &Address, point: GeoPoint) -> Self {
        self.responses.insert(address.key(), Ok(point));
        self
    }

    pub fn on_error(mut self, address: &Address, error: GeocodeError) -> Self {
        self.responses.insert(address.key(), Err(error));
        self
    }

    /// Sleep this long before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressResolver for MockResolver {
    async fn resolve(&self, address: &Address) -> Result<GeoPoint, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .get(&address.key())
            .copied()
            .unwrap_or(Err(GeocodeError::NotFound))
    }
}

// ---------------------------------------------------------------------------
// MemoryPostStore
// ---------------------------------------------------------------------------

/// Vec-backed store. Writes are validated before anything is applied, so a
/// rejected batch leaves the store untouched.
#[derive(Default)]
pub struct MemoryPostStore {
    posts: Mutex<Vec<Post>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<Post>) -> Self {
        Self {
            posts: Mutex::new(posts),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful write batches.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> Vec<Post> {
        self.lock().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Post> {
        self.lock().iter().find(|p| p.id == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Post>> {
        self.posts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn apply(posts: &mut [Post], updates: &[CoordinateUpdate]) -> Result<()> {
    if let Some(missing) = updates
        .iter()
        .find(|u| !posts.iter().any(|p| p.id == u.post_id))
    {
        bail!("unknown post {}", missing.post_id);
    }
    for update in updates {
        if let Some(post) = posts.iter_mut().find(|p| p.id == update.post_id) {
            post.coordinate = update.coordinate;
        }
    }
    Ok(())
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn snapshot(&self) -> Result<Vec<Post>> {
        Ok(self.posts())
    }

    async fn save_placement(&self, post: &Post, reflowed: &[CoordinateUpdate]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected");
        }
        let mut posts = self.lock();
        let mut next = posts.clone();
        match next.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => *existing = post.clone(),
            None => next.push(post.clone()),
        }
        apply(&mut next, reflowed)?;
        *posts = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_post(&self, post_id: Uuid, reflowed: &[CoordinateUpdate]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected");
        }
        let mut posts = self.lock();
        let mut next = posts.clone();
        let Some(index) = next.iter().position(|p| p.id == post_id) else {
            bail!("unknown post {post_id}");
        };
        next.remove(index);
        apply(&mut next, reflowed)?;
        *posts = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
