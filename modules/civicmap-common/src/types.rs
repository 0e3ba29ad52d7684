use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// --- Geo Types ---

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// True when both axes differ by at most `epsilon` degrees.
    pub fn approx_eq(&self, other: &GeoPoint, epsilon: f64) -> bool {
        (self.lat - other.lat).abs() <= epsilon && (self.lng - other.lng).abs() <= epsilon
    }
}

/// Where a post sits on the map.
///
/// `raw` is what the geocoder returned for the address and is kept only so later
/// placements can find co-located posts. `display` is what gets rendered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Coordinate {
    Unresolved,
    Placed { raw: GeoPoint, display: GeoPoint },
}

impl Coordinate {
    pub fn raw(&self) -> Option<GeoPoint> {
        match self {
            Coordinate::Placed { raw, .. } => Some(*raw),
            Coordinate::Unresolved => None,
        }
    }

    pub fn display(&self) -> Option<GeoPoint> {
        match self {
            Coordinate::Placed { display, .. } => Some(*display),
            Coordinate::Unresolved => None,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, Coordinate::Placed { .. })
    }
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Issue,
    Event,
}

impl std::fmt::Display for PostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostKind::Issue => write!(f, "issue"),
            PostKind::Event => write!(f, "event"),
        }
    }
}

impl FromStr for PostKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "issue" | "issues" => Ok(PostKind::Issue),
            "event" | "events" => Ok(PostKind::Event),
            _ => Err(ValidationError::InvalidValue {
                field: "kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Active,
    Closed,
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostStatus::Active => write!(f, "active"),
            PostStatus::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for PostStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "open" => Ok(PostStatus::Active),
            "closed" => Ok(PostStatus::Closed),
            _ => Err(ValidationError::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

// --- Address ---

/// Postal address as typed by the submitting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Address {
    pub text: String,
    pub borough: Option<String>,
    pub zipcode: Option<String>,
    pub neighborhood: Option<String>,
}

impl Address {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            borough: None,
            zipcode: None,
            neighborhood: None,
        }
    }

    pub fn with_borough(mut self, borough: impl Into<String>) -> Self {
        self.borough = Some(borough.into());
        self
    }

    pub fn with_zipcode(mut self, zipcode: impl Into<String>) -> Self {
        self.zipcode = Some(zipcode.into());
        self
    }

    pub fn with_neighborhood(mut self, neighborhood: impl Into<String>) -> Self {
        self.neighborhood = Some(neighborhood.into());
        self
    }

    /// Normalized identity of this address (text + borough + zipcode).
    pub fn key(&self) -> AddressKey {
        AddressKey::new(
            &self.text,
            self.borough.as_deref(),
            self.zipcode.as_deref(),
        )
    }

    /// Free-text form sent to a geocoding provider. Borough and zipcode are appended
    /// when present; `region` (e.g. "New York, NY") goes last.
    pub fn query_string(&self, region: Option<&str>) -> String {
        let mut parts: Vec<&str> = vec![self.text.trim()];
        for extra in [self.borough.as_deref(), self.zipcode.as_deref(), region] {
            if let Some(s) = extra.map(str::trim).filter(|s| !s.is_empty()) {
                parts.push(s);
            }
        }
        parts.join(", ")
    }
}

/// Normalized address identity: lowercase, whitespace collapsed, parts joined with `|`.
///
/// Used as the geocoder cache key and as the placement lock key, so two requests that
/// differ only in casing or spacing are treated as the same address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressKey(String);

impl AddressKey {
    pub fn new(text: &str, borough: Option<&str>, zipcode: Option<&str>) -> Self {
        let parts = [
            normalize_part(text),
            borough.map(normalize_part).unwrap_or_default(),
            zipcode.map(normalize_part).unwrap_or_default(),
        ];
        Self(parts.join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AddressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_part(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Post ---

/// A community post (issue or event) as handed over by the storage layer.
///
/// Counts and upvoters are pre-aggregated by storage; the engine never mutates
/// a post in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub kind: PostKind,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    /// Weak reference to the owning user.
    pub owner_id: Uuid,
    pub address: Address,
    pub coordinate: Coordinate,
    pub upvote_count: u32,
    pub comment_count: u32,
    #[serde(default)]
    pub upvoters: BTreeSet<Uuid>,
}

impl Post {
    pub fn display_point(&self) -> Option<GeoPoint> {
        self.coordinate.display()
    }

    pub fn raw_point(&self) -> Option<GeoPoint> {
        self.coordinate.raw()
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn is_upvoted_by(&self, user_id: Uuid) -> bool {
        self.upvoters.contains(&user_id)
    }
}

/// A coordinate write produced by placement, applied by storage in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoordinateUpdate {
    pub post_id: Uuid,
    pub coordinate: Coordinate,
}

// --- Layout policy ---

/// How co-located posts behave when their group grows or shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPolicy {
    /// Re-spread the whole group evenly on every insert or removal.
    #[default]
    Reflow,
    /// Never move an assigned display coordinate; newcomers take free slots.
    Stable,
}

impl FromStr for LayoutPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reflow" => Ok(LayoutPolicy::Reflow),
            "stable" => Ok(LayoutPolicy::Stable),
            _ => Err(ValidationError::InvalidValue {
                field: "layout_policy",
                value: s.to_string(),
            }),
        }
    }
}
