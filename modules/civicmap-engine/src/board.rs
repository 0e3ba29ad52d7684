//! List and map views over one query result.

use std::collections::BTreeSet;

use civicmap_common::{ClusterConfig, Post};
use civicmap_geo::{ClusterPlanner, Marker, MarkerGroup, ViewportBounds};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::{PostQuery, QueryEngine};

/// Ordered query result in map form. Posts without a display coordinate are
/// reported as `unplaced` rather than dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MapFeed {
    pub markers: Vec<Marker>,
    pub unplaced: Vec<Uuid>,
}

impl MapFeed {
    pub fn from_posts(posts: &[Post]) -> Self {
        let mut feed = MapFeed::default();
        for post in posts {
            match post.display_point() {
                Some(point) => feed.markers.push(Marker { id: post.id, point }),
                None => feed.unplaced.push(post.id),
            }
        }
        feed
    }

    /// Every post id the feed accounts for.
    pub fn ids(&self) -> BTreeSet<Uuid> {
        self.markers
            .iter()
            .map(|m| m.id)
            .chain(self.unplaced.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MapView {
    pub groups: Vec<MarkerGroup>,
    pub feed: MapFeed,
}

pub struct Board {
    planner: ClusterPlanner,
}

impl Board {
    pub fn new(planner: ClusterPlanner) -> Self {
        Self { planner }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(ClusterPlanner::from_config(config))
    }

    pub fn list(&self, posts: &[Post], query: &PostQuery) -> Vec<Post> {
        QueryEngine::query(posts, query)
    }

    pub fn map(&self, posts: &[Post], query: &PostQuery, bounds: &ViewportBounds, zoom: u8) -> MapView {
        let feed = MapFeed::from_posts(&QueryEngine::query(posts, query));
        let groups = self.planner.plan(&feed.markers, bounds, zoom);
        MapView { groups, feed }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use civicmap_common::GeoPoint;

    use super::*;
    use crate::testing::{placed_post, post};

    #[test]
    fn unplaced_posts_are_reported_not_dropped() {
        let posts = vec![
            placed_post(1, "a", GeoPoint::new(40.7, -73.9)),
            post(2, "b"),
        ];
        let feed = MapFeed::from_posts(&posts);
        assert_eq!(feed.markers.len(), 1);
        assert_eq!(feed.unplaced, vec![Uuid::from_u128(2)]);
        assert_eq!(feed.ids().len(), 2);
    }

    #[test]
    fn map_groups_only_cover_visible_markers() {
        let posts = vec![
            placed_post(1, "near", GeoPoint::new(40.7, -73.9)),
            placed_post(2, "far", GeoPoint::new(34.05, -118.24)),
        ];
        let bounds = ViewportBounds::new(40.0, -75.0, 41.0, -73.0);

        let view = Board::default().map(&posts, &PostQuery::default(), &bounds, 12);
        let ids: Vec<Uuid> = view.groups.iter().flat_map(|g| g.member_ids()).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1)]);
        assert_eq!(view.feed.ids().len(), 2);
    }
}
