//! The list and the map must always agree on which posts a query selects.

use std::collections::BTreeSet;

use civicmap_common::{GeoPoint, Post, PostStatus, ValidationError};
use civicmap_engine::testing::{event, placed_post, post, DEFAULT_OWNER};
use civicmap_engine::{Board, PostQuery, QueryEngine, QueryParams, ViewerContext};
use civicmap_geo::{MarkerGroup, ViewportBounds};
use uuid::Uuid;

fn brooklyn() -> ViewportBounds {
    ViewportBounds::new(40.57, -74.05, 40.74, -73.85)
}

fn board_posts() -> Vec<Post> {
    let other_owner = Uuid::from_u128(2000);
    let mut posts = vec![
        placed_post(1, "Broken streetlight", GeoPoint::new(40.6710, -73.9814)),
        placed_post(2, "Pothole on 7th", GeoPoint::new(40.6720, -73.9800)),
        Post {
            owner_id: other_owner,
            ..event(3, "Street fair")
        },
        Post {
            status: PostStatus::Closed,
            upvote_count: 12,
            ..placed_post(4, "Graffiti cleanup", GeoPoint::new(40.6800, -73.9700))
        },
        Post {
            upvote_count: 12,
            ..placed_post(5, "Tree planting", GeoPoint::new(40.7644, -73.9235))
        },
    ];
    posts[1].upvoters.insert(DEFAULT_OWNER);
    posts
}

fn params(filter: Option<&str>, search: Option<&str>, sort: Option<&str>) -> QueryParams {
    QueryParams {
        scope: None,
        filter: filter.map(str::to_string),
        search: search.map(str::to_string),
        sort: sort.map(str::to_string),
    }
}

#[test]
fn issues_newest_first() {
    let posts = vec![
        post(1, "older issue"),
        event(2, "event a"),
        post(3, "newer issue"),
        event(4, "event b"),
        event(5, "event c"),
    ];
    let query = params(Some("kind:issue"), Some(""), Some("recent"))
        .validate(&ViewerContext::anonymous())
        .unwrap();

    let ids = QueryEngine::query_ids(&posts, &query);
    assert_eq!(ids, vec![Uuid::from_u128(3), Uuid::from_u128(1)]);
}

#[test]
fn list_and_map_see_the_same_posts() {
    let posts = board_posts();
    let board = Board::default();
    let viewer = ViewerContext::signed_in(DEFAULT_OWNER);

    let cases = [
        params(None, None, None),
        params(Some("kind:event"), None, None),
        params(Some("status:closed"), None, Some("popular")),
        params(Some("upvoted_by:me"), None, None),
        params(None, Some("street"), Some("popular")),
        QueryParams {
            scope: Some("mine".to_string()),
            ..params(None, None, None)
        },
    ];

    for case in cases {
        let query = case.validate(&viewer).unwrap();
        let listed: BTreeSet<Uuid> = board.list(&posts, &query).iter().map(|p| p.id).collect();
        let view = board.map(&posts, &query, &ViewportBounds::world(), 12);
        assert_eq!(listed, view.feed.ids(), "parity broken for {query:?}");
    }
}

#[test]
fn map_marker_order_follows_the_list() {
    let posts = board_posts();
    let board = Board::default();
    let query = PostQuery::builder().build();

    let listed: Vec<Uuid> = board
        .list(&posts, &query)
        .iter()
        .filter(|p| p.display_point().is_some())
        .map(|p| p.id)
        .collect();
    let view = board.map(&posts, &query, &ViewportBounds::world(), 12);
    let mapped: Vec<Uuid> = view.feed.markers.iter().map(|m| m.id).collect();
    assert_eq!(listed, mapped);
    assert_eq!(view.feed.unplaced, vec![Uuid::from_u128(3)]);
}

#[test]
fn query_is_deterministic_over_input_order() {
    let posts = board_posts();
    let mut reversed = posts.clone();
    reversed.reverse();
    let query = PostQuery::builder().sort(civicmap_engine::SortSpec::Popular).build();

    let a = QueryEngine::query_ids(&posts, &query);
    let b = QueryEngine::query_ids(&reversed, &query);
    assert_eq!(a, b);
    // Equal upvote counts fall back to ascending id.
    assert_eq!(&a[..2], &[Uuid::from_u128(4), Uuid::from_u128(5)]);
}

#[test]
fn viewport_excludes_posts_outside_bounds() {
    let posts = board_posts();
    let view = Board::default().map(&posts, &PostQuery::default(), &brooklyn(), 18);

    let grouped: BTreeSet<Uuid> = view.groups.iter().flat_map(|g| g.member_ids()).collect();
    assert!(!grouped.contains(&Uuid::from_u128(5)));
    assert!(!grouped.contains(&Uuid::from_u128(3)));
    assert_eq!(grouped.len(), 3);
}

#[test]
fn nearby_markers_cluster_when_zoomed_out() {
    let center = GeoPoint::new(40.6710, -73.9814);
    let posts: Vec<Post> = (0..4u32)
        .map(|i| {
            let offset = f64::from(i) * 0.0005;
            placed_post(u128::from(i) + 1, "corner", GeoPoint::new(center.lat + offset, center.lng))
        })
        .collect();
    let board = Board::default();
    let query = PostQuery::default();

    let zoomed_out = board.map(&posts, &query, &brooklyn(), 10);
    assert_eq!(zoomed_out.groups.len(), 1);
    match &zoomed_out.groups[0] {
        MarkerGroup::Cluster(cluster) => assert_eq!(cluster.len(), 4),
        other => panic!("expected a cluster, got {other:?}"),
    }

    let zoomed_in = board.map(&posts, &query, &brooklyn(), 18);
    assert_eq!(zoomed_in.groups.len(), 4);
    assert!(zoomed_in
        .groups
        .iter()
        .all(|g| matches!(g, MarkerGroup::Single(_))));
}

#[test]
fn malformed_parameters_are_rejected() {
    let viewer = ViewerContext::anonymous();

    assert_eq!(
        params(Some("color:red"), None, None).validate(&viewer),
        Err(ValidationError::UnknownFilter("color:red".to_string()))
    );
    assert_eq!(
        params(None, None, Some("loudest")).validate(&viewer),
        Err(ValidationError::UnknownSort("loudest".to_string()))
    );
    assert!(matches!(
        QueryParams {
            scope: Some("mine".to_string()),
            ..params(None, None, None)
        }
        .validate(&viewer),
        Err(ValidationError::ViewerRequired(_))
    ));
}
