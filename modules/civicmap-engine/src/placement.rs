//! Write-time placement: address → raw coordinate → collision-free display coordinate.
//!
//! [`PlacementPlanner`] is the pure half: given a raw coordinate and the current
//! posts it decides every coordinate write. [`PlacementService`] wraps it with the
//! geocoder call, the per-address lock and the storage commit.
//!
//! Locking is two-level. The address lock (normalized text) keeps one address's
//! placements, edits and removals in order. The commit lock covers the read of
//! the snapshot through the write, since two spellings of one address only meet
//! once they are geocoded to the same raw point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use civicmap_common::{
    Address, Coordinate, CoordinateUpdate, EngineConfig, GeoPoint, GeocodeError, LayoutPolicy,
    PlacementConfig, Post, ValidationError, MAX_SIBLING_EPSILON_DEGREES,
};
use civicmap_geo::CollisionResolver;
use civicmap_geocoder::{AddressResolver, MAX_ADDRESS_LEN};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::locks::AddressLocks;
use crate::store::PostStore;

/// Geohash length for sibling bucketing (~150 m cells).
const SIBLING_CELL_PRECISION: usize = 7;

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementOutcome {
    /// The submitted post carrying its new coordinate.
    pub post: Post,
    pub raw: GeoPoint,
    pub display: GeoPoint,
    /// Siblings whose display coordinate moved as a consequence.
    pub reflowed: Vec<CoordinateUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementPlan {
    pub display: GeoPoint,
    pub reflowed: Vec<CoordinateUpdate>,
}

// ---------------------------------------------------------------------------
// PlacementPlanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PlacementPlanner {
    collision: CollisionResolver,
    epsilon: f64,
}

struct Member {
    id: Uuid,
    created_at: DateTime<Utc>,
    raw: GeoPoint,
    display: Option<GeoPoint>,
}

impl PlacementPlanner {
    /// `epsilon` is capped at [`MAX_SIBLING_EPSILON_DEGREES`], the widest
    /// tolerance the geohash sibling index covers.
    pub fn new(collision: CollisionResolver, epsilon: f64) -> Self {
        Self {
            collision,
            epsilon: epsilon.min(MAX_SIBLING_EPSILON_DEGREES),
        }
    }

    pub fn from_config(config: &PlacementConfig) -> Self {
        Self::new(CollisionResolver::from_config(config), config.sibling_epsilon_degrees)
    }

    /// Placed posts (other than `exclude`) whose raw coordinate matches `raw`.
    pub fn siblings<'a>(&self, raw: GeoPoint, existing: &'a [Post], exclude: Uuid) -> Vec<&'a Post> {
        SiblingIndex::build(existing.iter().filter(|p| p.id != exclude), self.epsilon).siblings_of(raw)
    }

    /// Decide where `draft` goes given its geocoded `raw` point and the posts that
    /// already exist. If `draft` was previously placed elsewhere, the group it
    /// leaves is laid out again as well.
    pub fn plan(&self, draft: &Post, raw: GeoPoint, existing: &[Post]) -> PlacementPlan {
        let index = SiblingIndex::build(existing.iter().filter(|p| p.id != draft.id), self.epsilon);
        let siblings = index.siblings_of(raw);
        let (display, mut reflowed) = self.join_group(draft, raw, &siblings);

        let previous_raw = existing
            .iter()
            .find(|p| p.id == draft.id)
            .and_then(Post::raw_point)
            .filter(|prev| !prev.approx_eq(&raw, self.epsilon));
        if let Some(previous_raw) = previous_raw {
            reflowed.extend(self.relayout(&index.siblings_of(previous_raw)));
        }

        PlacementPlan { display, reflowed }
    }

    /// Coordinate writes needed once `post_id` disappears from its group.
    pub fn plan_removal(&self, post_id: Uuid, existing: &[Post]) -> Vec<CoordinateUpdate> {
        let Some(raw) = existing.iter().find(|p| p.id == post_id).and_then(Post::raw_point) else {
            return Vec::new();
        };
        self.relayout(&self.siblings(raw, existing, post_id))
    }

    fn join_group(&self, draft: &Post, raw: GeoPoint, siblings: &[&Post]) -> (GeoPoint, Vec<CoordinateUpdate>) {
        if siblings.is_empty() {
            return (raw, Vec::new());
        }

        let mut members = members_of(siblings);
        members.push(Member {
            id: draft.id,
            created_at: draft.created_at,
            raw,
            display: None,
        });

        match self.collision.policy() {
            LayoutPolicy::Stable => {
                sort_by_creation(&mut members);
                let taken: Vec<GeoPoint> = siblings.iter().filter_map(|p| p.display_point()).collect();
                let display = self.collision.first_free_slot(members[0].raw, &taken, self.epsilon);
                (display, Vec::new())
            }
            LayoutPolicy::Reflow => {
                let assigned = self.spread(members);
                let display = assigned
                    .iter()
                    .find(|(m, _)| m.id == draft.id)
                    .map(|(_, d)| *d)
                    .unwrap_or(raw);
                (display, changed(&assigned, Some(draft.id)))
            }
        }
    }

    /// Lay an existing group out again (after a member left).
    fn relayout(&self, group: &[&Post]) -> Vec<CoordinateUpdate> {
        if group.is_empty() || self.collision.policy() == LayoutPolicy::Stable {
            return Vec::new();
        }
        changed(&self.spread(members_of(group)), None)
    }

    /// Assign every member its ordinal position around the oldest member's raw point.
    fn spread(&self, mut members: Vec<Member>) -> Vec<(Member, GeoPoint)> {
        sort_by_creation(&mut members);
        let center = members[0].raw;
        let raws: Vec<GeoPoint> = members.iter().map(|m| m.raw).collect();

        members
            .into_iter()
            .enumerate()
            .map(|(i, member)| {
                let others: Vec<GeoPoint> = raws
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, p)| *p)
                    .collect();
                let display = self.collision.assign_display(center, &others, i);
                (member, display)
            })
            .collect()
    }
}

fn members_of(posts: &[&Post]) -> Vec<Member> {
    posts
        .iter()
        .filter_map(|p| {
            p.raw_point().map(|raw| Member {
                id: p.id,
                created_at: p.created_at,
                raw,
                display: p.display_point(),
            })
        })
        .collect()
}

fn sort_by_creation(members: &mut [Member]) {
    members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Updates for members whose display coordinate differs from what is stored.
fn changed(assigned: &[(Member, GeoPoint)], skip: Option<Uuid>) -> Vec<CoordinateUpdate> {
    assigned
        .iter()
        .filter(|(m, _)| Some(m.id) != skip)
        .filter(|(m, display)| m.display != Some(*display))
        .map(|(m, display)| CoordinateUpdate {
            post_id: m.id,
            coordinate: Coordinate::Placed {
                raw: m.raw,
                display: *display,
            },
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SiblingIndex (geohash buckets over raw coordinates)
// ---------------------------------------------------------------------------

struct SiblingIndex<'a> {
    cells: HashMap<String, Vec<&'a Post>>,
    unbucketed: Vec<&'a Post>,
    epsilon: f64,
}

impl<'a> SiblingIndex<'a> {
    fn build(posts: impl Iterator<Item = &'a Post>, epsilon: f64) -> Self {
        let mut cells: HashMap<String, Vec<&'a Post>> = HashMap::new();
        let mut unbucketed = Vec::new();
        for post in posts {
            let Some(raw) = post.raw_point() else {
                continue;
            };
            match cell_of(raw) {
                Some(cell) => cells.entry(cell).or_default().push(post),
                None => unbucketed.push(post),
            }
        }
        Self { cells, unbucketed, epsilon }
    }

    fn siblings_of(&self, raw: GeoPoint) -> Vec<&'a Post> {
        let neighborhood = cell_of(raw).and_then(|cell| {
            let n = geohash::neighbors(&cell).ok()?;
            Some([cell, n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw])
        });

        let candidates: Vec<&'a Post> = match neighborhood {
            Some(cells) => cells
                .iter()
                .filter_map(|c| self.cells.get(c))
                .flatten()
                .chain(self.unbucketed.iter())
                .copied()
                .collect(),
            None => self
                .cells
                .values()
                .flatten()
                .chain(self.unbucketed.iter())
                .copied()
                .collect(),
        };

        let mut siblings: Vec<&'a Post> = candidates
            .into_iter()
            .filter(|p| p.raw_point().is_some_and(|r| r.approx_eq(&raw, self.epsilon)))
            .collect();
        siblings.sort_by_key(|p| p.id);
        siblings.dedup_by_key(|p| p.id);
        siblings
    }
}

fn cell_of(point: GeoPoint) -> Option<String> {
    geohash::encode(geohash::Coord { x: point.lng, y: point.lat }, SIBLING_CELL_PRECISION).ok()
}

// ---------------------------------------------------------------------------
// PlacementService
// ---------------------------------------------------------------------------

pub struct PlacementService {
    resolver: Arc<dyn AddressResolver>,
    store: Arc<dyn PostStore>,
    planner: PlacementPlanner,
    timeout: Duration,
    locks: AddressLocks,
    commit: AsyncMutex<()>,
}

impl PlacementService {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        store: Arc<dyn PostStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            planner: PlacementPlanner::from_config(&config.placement),
            timeout: config.geocoder.timeout(),
            locks: AddressLocks::new(),
            commit: AsyncMutex::new(()),
        }
    }

    pub fn planner(&self) -> &PlacementPlanner {
        &self.planner
    }

    /// Place a new or edited post and persist the result.
    ///
    /// An edited post whose address is unchanged keeps its stored coordinate and
    /// nothing is written. On any error nothing is written either.
    pub async fn place(&self, draft: &Post) -> Result<PlacementOutcome, PlacementError> {
        validate_address(&draft.address)?;
        let key = draft.address.key();

        // The old address must be locked too when an edit moves the post.
        let mut keys = vec![key.clone()];
        if let Some(previous) = self.find_post(draft.id).await? {
            if previous.coordinate.is_placed() {
                keys.push(previous.address.key());
            }
        }
        let _guards = self.locks.acquire_all(&keys).await;

        let snapshot = self.store.snapshot().await.map_err(PlacementError::Storage)?;
        if let Some(current) = snapshot.iter().find(|p| p.id == draft.id) {
            if let Coordinate::Placed { raw, display } = current.coordinate {
                if current.address.key() == key {
                    debug!(post_id = %draft.id, "Address unchanged, keeping stored coordinate");
                    let mut post = draft.clone();
                    post.coordinate = current.coordinate;
                    return Ok(PlacementOutcome {
                        post,
                        raw,
                        display,
                        reflowed: Vec::new(),
                    });
                }
            }
        }

        let raw = self.resolve(&draft.address).await?;

        let _commit = self.commit.lock().await;
        let snapshot = self.store.snapshot().await.map_err(PlacementError::Storage)?;
        let plan = self.planner.plan(draft, raw, &snapshot);

        let mut post = draft.clone();
        post.coordinate = Coordinate::Placed {
            raw,
            display: plan.display,
        };
        self.store
            .save_placement(&post, &plan.reflowed)
            .await
            .map_err(|e| {
                warn!(post_id = %post.id, error = %e, "Failed to persist placement");
                PlacementError::Storage(e)
            })?;

        info!(
            post_id = %post.id,
            address = %key,
            lat = plan.display.lat,
            lng = plan.display.lng,
            reflowed = plan.reflowed.len(),
            "Placed post"
        );
        Ok(PlacementOutcome {
            post,
            raw,
            display: plan.display,
            reflowed: plan.reflowed,
        })
    }

    /// Delete a post and lay out the group it leaves behind, in one storage
    /// write. Returns the siblings whose display coordinate moved.
    pub async fn remove(&self, post_id: Uuid) -> Result<Vec<CoordinateUpdate>, PlacementError> {
        let Some(previous) = self.find_post(post_id).await? else {
            return Ok(Vec::new());
        };
        let _guard = self.locks.acquire(&previous.address.key()).await;
        let _commit = self.commit.lock().await;

        let snapshot = self.store.snapshot().await.map_err(PlacementError::Storage)?;
        if !snapshot.iter().any(|p| p.id == post_id) {
            debug!(post_id = %post_id, "Post already gone, nothing to remove");
            return Ok(Vec::new());
        }
        let updates = self.planner.plan_removal(post_id, &snapshot);
        self.store
            .delete_post(post_id, &updates)
            .await
            .map_err(|e| {
                warn!(post_id = %post_id, error = %e, "Failed to delete post");
                PlacementError::Storage(e)
            })?;

        info!(post_id = %post_id, reflowed = updates.len(), "Removed post");
        Ok(updates)
    }

    async fn find_post(&self, post_id: Uuid) -> Result<Option<Post>, PlacementError> {
        let snapshot = self.store.snapshot().await.map_err(PlacementError::Storage)?;
        Ok(snapshot.into_iter().find(|p| p.id == post_id))
    }

    async fn resolve(&self, address: &Address) -> Result<GeoPoint, PlacementError> {
        match tokio::time::timeout(self.timeout, self.resolver.resolve(address)).await {
            Ok(Ok(raw)) if raw.is_finite() => Ok(raw),
            Ok(Ok(_)) => {
                warn!(address = %address.key(), "Geocoder returned a non-finite coordinate");
                Err(GeocodeError::ProviderUnavailable.into())
            }
            Ok(Err(e)) => {
                warn!(address = %address.key(), error = %e, "Geocoding failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    address = %address.key(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Geocoding timed out"
                );
                Err(GeocodeError::ProviderUnavailable.into())
            }
        }
    }
}

pub fn validate_address(address: &Address) -> Result<(), ValidationError> {
    let len = address.text.trim().chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyAddress);
    }
    if len > MAX_ADDRESS_LEN {
        return Err(ValidationError::AddressTooLong {
            len,
            max: MAX_ADDRESS_LEN,
        });
    }
    Ok(())
}
