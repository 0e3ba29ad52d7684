use civicmap_common::GeoPoint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Visible map rectangle in degrees.
///
/// `west > east` means the viewport crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ViewportBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl ViewportBounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self { south, west, north, east }
    }

    /// Whole-world viewport.
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Edges are inclusive.
    pub fn contains(&self, point: GeoPoint) -> bool {
        if !point.is_finite() || point.lat < self.south || point.lat > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            point.lng >= self.west || point.lng <= self.east
        } else {
            point.lng >= self.west && point.lng <= self.east
        }
    }
}
