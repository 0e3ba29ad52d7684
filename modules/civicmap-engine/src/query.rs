//! The single filter/search/sort authority for posts.
//!
//! Both the list and the map consume [`QueryEngine::query`]; neither re-implements a
//! predicate. Everything here is a pure function of the snapshot it is given.

use std::cmp::Ordering;
use std::str::FromStr;

use civicmap_common::{Post, PostKind, PostStatus, ValidationError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Who is looking. Replaces any ambient "current user" state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ViewerContext {
    pub viewer_id: Option<Uuid>,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self { viewer_id: None }
    }

    pub fn signed_in(user_id: Uuid) -> Self {
        Self { viewer_id: Some(user_id) }
    }

    fn require(&self, what: &'static str) -> Result<Uuid, ValidationError> {
        self.viewer_id.ok_or(ValidationError::ViewerRequired(what))
    }
}

/// Ownership context, applied before any other predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "user_id", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Everyone,
    /// Profile view: only posts owned by this user.
    OwnedBy(Uuid),
}

impl Scope {
    pub fn matches(&self, post: &Post) -> bool {
        match self {
            Scope::Everyone => true,
            Scope::OwnedBy(user_id) => post.is_owned_by(*user_id),
        }
    }

    /// `all`, `mine`, or `user:<uuid>`.
    pub fn parse(raw: &str, viewer: &ViewerContext) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "all" | "everyone" => return Ok(Scope::Everyone),
            "mine" => return Ok(Scope::OwnedBy(viewer.require("mine")?)),
            _ => {}
        }
        match trimmed.split_once(':') {
            Some((key, id)) if key.eq_ignore_ascii_case("user") => {
                parse_user_id(id, "scope").map(Scope::OwnedBy)
            }
            _ => Err(ValidationError::UnknownScope(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterSpec {
    #[default]
    All,
    Status(PostStatus),
    Kind(PostKind),
    Borough(String),
    Neighborhood(String),
    UpvotedBy(Uuid),
}

impl FilterSpec {
    pub fn matches(&self, post: &Post) -> bool {
        match self {
            FilterSpec::All => true,
            FilterSpec::Status(status) => post.status == *status,
            FilterSpec::Kind(kind) => post.kind == *kind,
            FilterSpec::Borough(b) => same_place(post.address.borough.as_deref(), b),
            FilterSpec::Neighborhood(n) => same_place(post.address.neighborhood.as_deref(), n),
            FilterSpec::UpvotedBy(user_id) => post.is_upvoted_by(*user_id),
        }
    }

    /// `all`, or `key:value` with key one of `status`, `kind`, `borough`,
    /// `neighborhood`, `upvoted_by`. `upvoted_by:me` resolves to the viewer.
    pub fn parse(raw: &str, viewer: &ViewerContext) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Ok(FilterSpec::All);
        }
        let Some((key, value)) = raw.split_once(':') else {
            return Err(ValidationError::UnknownFilter(raw.to_string()));
        };
        let key = key.trim().to_ascii_lowercase().replace(['_', '-'], "");
        let value = value.trim();
        if value.is_empty() {
            return Err(ValidationError::MissingFilterValue(key));
        }

        match key.as_str() {
            "status" => Ok(FilterSpec::Status(value.parse()?)),
            "kind" => Ok(FilterSpec::Kind(value.parse()?)),
            "borough" => Ok(FilterSpec::Borough(value.to_string())),
            "neighborhood" => Ok(FilterSpec::Neighborhood(value.to_string())),
            "upvotedby" if value.eq_ignore_ascii_case("me") => {
                Ok(FilterSpec::UpvotedBy(viewer.require("upvoted_by:me")?))
            }
            "upvotedby" => parse_user_id(value, "upvoted_by").map(FilterSpec::UpvotedBy),
            _ => Err(ValidationError::UnknownFilter(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortSpec {
    /// Newest first.
    #[default]
    Recent,
    /// Most upvoted first.
    Popular,
}

impl SortSpec {
    /// Total order: the sort key, then ascending id.
    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        let primary = match self {
            SortSpec::Recent => b.created_at.cmp(&a.created_at),
            SortSpec::Popular => b.upvote_count.cmp(&a.upvote_count),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl FromStr for SortSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "recent" | "newest" => Ok(SortSpec::Recent),
            "popular" | "top" => Ok(SortSpec::Popular),
            _ => Err(ValidationError::UnknownSort(s.to_string())),
        }
    }
}

/// A fully validated query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, TypedBuilder)]
pub struct PostQuery {
    #[builder(default)]
    pub scope: Scope,
    #[builder(default)]
    pub filter: FilterSpec,
    /// Case-insensitive substring matched against the title.
    #[builder(default, setter(strip_option, into))]
    pub search: Option<String>,
    #[builder(default)]
    pub sort: SortSpec,
}

impl PostQuery {
    fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

/// Raw query-string parameters as they arrive from the UI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub scope: Option<String>,
    pub filter: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl QueryParams {
    /// Parse every parameter; the first malformed one rejects the whole query.
    pub fn validate(&self, viewer: &ViewerContext) -> Result<PostQuery, ValidationError> {
        Ok(PostQuery {
            scope: match &self.scope {
                Some(raw) => Scope::parse(raw, viewer)?,
                None => Scope::Everyone,
            },
            filter: match &self.filter {
                Some(raw) => FilterSpec::parse(raw, viewer)?,
                None => FilterSpec::All,
            },
            search: self.search.clone().filter(|s| !s.trim().is_empty()),
            sort: match &self.sort {
                Some(raw) => raw.parse()?,
                None => SortSpec::Recent,
            },
        })
    }
}

pub struct QueryEngine;

impl QueryEngine {
    /// Scope, then filter, then title search, then a stable total sort.
    ///
    /// Never fails and never touches `posts`; the result is a fresh vector.
    pub fn query(posts: &[Post], query: &PostQuery) -> Vec<Post> {
        let needle = query.search_needle();

        let mut results: Vec<Post> = posts
            .iter()
            .filter(|p| query.scope.matches(p))
            .filter(|p| query.filter.matches(p))
            .filter(|p| match &needle {
                Some(needle) => p.title.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| query.sort.compare(a, b));
        results
    }

    pub fn query_ids(posts: &[Post], query: &PostQuery) -> Vec<Uuid> {
        Self::query(posts, query).iter().map(|p| p.id).collect()
    }
}

fn same_place(actual: Option<&str>, wanted: &str) -> bool {
    actual.is_some_and(|a| a.trim().eq_ignore_ascii_case(wanted.trim()))
}

fn parse_user_id(raw: &str, field: &'static str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use civicmap_common::{Address, Coordinate};

    use super::*;

    fn post(n: u128, title: &str, kind: PostKind, minutes: i64) -> Post {
        Post {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            description: String::new(),
            kind,
            status: PostStatus::Active,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
            owner_id: Uuid::from_u128(1000),
            address: Address::new("1 Main St"),
            coordinate: Coordinate::Unresolved,
            upvote_count: 0,
            comment_count: 0,
            upvoters: Default::default(),
        }
    }

    fn sample() -> Vec<Post> {
        vec![
            post(1, "Pothole on Atlantic Ave", PostKind::Issue, 10),
            post(2, "Block party", PostKind::Event, 20),
            post(3, "Broken streetlight", PostKind::Issue, 30),
            post(4, "Farmers market", PostKind::Event, 40),
            post(5, "Library reading", PostKind::Event, 50),
        ]
    }

    #[test]
    fn kind_filter_returns_issues_newest_first() {
        let q = PostQuery::builder().filter(FilterSpec::Kind(PostKind::Issue)).build();
        assert_eq!(
            QueryEngine::query_ids(&sample(), &q),
            vec![Uuid::from_u128(3), Uuid::from_u128(1)]
        );
    }

    #[test]
    fn search_is_case_insensitive_on_title() {
        let q = PostQuery::builder().search("MARKET").build();
        assert_eq!(QueryEngine::query_ids(&sample(), &q), vec![Uuid::from_u128(4)]);
    }

    #[test]
    fn blank_search_matches_everything() {
        let q = PostQuery::builder().search("   ").build();
        assert_eq!(QueryEngine::query(&sample(), &q).len(), 5);
    }

    #[test]
    fn equal_keys_fall_back_to_ascending_id() {
        let mut posts = sample();
        for p in &mut posts {
            p.created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        }
        posts.reverse();
        let ids = QueryEngine::query_ids(&posts, &PostQuery::default());
        let expected: Vec<Uuid> = (1..=5).map(Uuid::from_u128).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn popular_sorts_by_upvotes() {
        let mut posts = sample();
        posts[0].upvote_count = 3;
        posts[4].upvote_count = 7;
        posts[2].upvote_count = 3;
        let q = PostQuery::builder().sort(SortSpec::Popular).build();
        let ids = QueryEngine::query_ids(&posts, &q);
        assert_eq!(&ids[..3], &[Uuid::from_u128(5), Uuid::from_u128(1), Uuid::from_u128(3)]);
    }

    #[test]
    fn scope_is_anded_with_filter() {
        let mut posts = sample();
        let me = Uuid::from_u128(77);
        posts[1].owner_id = me;
        posts[2].owner_id = me;
        let q = PostQuery::builder()
            .scope(Scope::OwnedBy(me))
            .filter(FilterSpec::Kind(PostKind::Event))
            .build();
        assert_eq!(QueryEngine::query_ids(&posts, &q), vec![Uuid::from_u128(2)]);
    }

    #[test]
    fn borough_match_ignores_case() {
        let mut posts = sample();
        posts[0].address.borough = Some("Brooklyn".into());
        let q = PostQuery::builder().filter(FilterSpec::Borough("brooklyn".into())).build();
        assert_eq!(QueryEngine::query_ids(&posts, &q), vec![Uuid::from_u128(1)]);
    }

    #[test]
    fn query_does_not_touch_input() {
        let posts = sample();
        let before = posts.clone();
        let _ = QueryEngine::query(&posts, &PostQuery::builder().sort(SortSpec::Popular).build());
        assert_eq!(posts, before);
    }

    #[test]
    fn filter_parsing() {
        let viewer = ViewerContext::signed_in(Uuid::from_u128(9));
        assert_eq!(FilterSpec::parse("all", &viewer).unwrap(), FilterSpec::All);
        assert_eq!(
            FilterSpec::parse("kind:event", &viewer).unwrap(),
            FilterSpec::Kind(PostKind::Event)
        );
        assert_eq!(
            FilterSpec::parse("upvoted_by:me", &viewer).unwrap(),
            FilterSpec::UpvotedBy(Uuid::from_u128(9))
        );
        assert_eq!(
            FilterSpec::parse("neighborhood: Park Slope ", &viewer).unwrap(),
            FilterSpec::Neighborhood("Park Slope".into())
        );
        assert!(matches!(
            FilterSpec::parse("color:red", &viewer),
            Err(ValidationError::UnknownFilter(_))
        ));
        assert!(matches!(
            FilterSpec::parse("status:", &viewer),
            Err(ValidationError::MissingFilterValue(_))
        ));
        assert!(matches!(
            FilterSpec::parse("upvoted_by:not-a-uuid", &viewer),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn mine_requires_a_viewer() {
        let params = QueryParams {
            scope: Some("mine".into()),
            ..Default::default()
        };
        assert_eq!(
            params.validate(&ViewerContext::anonymous()),
            Err(ValidationError::ViewerRequired("mine"))
        );
        let me = Uuid::from_u128(5);
        assert_eq!(
            params.validate(&ViewerContext::signed_in(me)).unwrap().scope,
            Scope::OwnedBy(me)
        );
    }

    #[test]
    fn bad_sort_rejects_whole_query() {
        let params = QueryParams {
            filter: Some("kind:issue".into()),
            sort: Some("alphabetical".into()),
            ..Default::default()
        };
        assert!(matches!(
            params.validate(&ViewerContext::anonymous()),
            Err(ValidationError::UnknownSort(_))
        ));
    }
}
