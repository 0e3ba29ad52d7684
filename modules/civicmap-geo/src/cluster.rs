//! Zoom-dependent marker grouping for the map view.
//!
//! `plan` is a pure function of its inputs: the result does not depend on the order
//! markers are passed in, and running it twice yields the same groups in the same
//! order.

use std::collections::HashMap;
use std::f64::consts::PI;

use civicmap_common::{ClusterConfig, GeoPoint};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::bounds::ViewportBounds;

/// Web map tile edge in pixels.
const TILE_SIZE: f64 = 256.0;

/// Zoom levels above this are treated as this.
pub const MAX_SUPPORTED_ZOOM: u8 = 22;

/// Web Mercator is undefined at the poles; clamp sin(lat) just short of ±1.
const MAX_SIN_LAT: f64 = 0.9999;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Marker {
    pub id: Uuid,
    pub point: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Cluster {
    pub centroid: GeoPoint,
    pub member_ids: Vec<Uuid>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// One renderable thing on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkerGroup {
    Single(Marker),
    Cluster(Cluster),
}

impl MarkerGroup {
    pub fn member_ids(&self) -> Vec<Uuid> {
        match self {
            MarkerGroup::Single(m) => vec![m.id],
            MarkerGroup::Cluster(c) => c.member_ids.clone(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        match self {
            MarkerGroup::Single(m) => m.point,
            MarkerGroup::Cluster(c) => c.centroid,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterPlanner {
    radius_px: f64,
    max_zoom: u8,
}

impl ClusterPlanner {
    pub fn new(radius_px: f64, max_zoom: u8) -> Self {
        Self {
            radius_px: radius_px.max(0.0),
            max_zoom,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.radius_px, config.max_zoom)
    }

    /// Grouping distance in screen pixels at `zoom`. Shrinks linearly from
    /// `radius_px` at zoom 0 to zero at `max_zoom`.
    pub fn threshold_px(&self, zoom: u8) -> f64 {
        if zoom >= self.max_zoom {
            return 0.0;
        }
        self.radius_px * f64::from(self.max_zoom - zoom) / f64::from(self.max_zoom)
    }

    /// Group the markers inside `bounds` for rendering at `zoom`.
    ///
    /// Markers are visited in id order. Each unvisited marker seeds a group that
    /// absorbs every other unvisited marker closer than the threshold in pixel
    /// space. Groups of one come back as [`MarkerGroup::Single`].
    pub fn plan(&self, markers: &[Marker], bounds: &ViewportBounds, zoom: u8) -> Vec<MarkerGroup> {
        let zoom = zoom.min(MAX_SUPPORTED_ZOOM);

        let mut visible: Vec<&Marker> = markers.iter().filter(|m| bounds.contains(m.point)).collect();
        visible.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then(a.point.lat.total_cmp(&b.point.lat))
                .then(a.point.lng.total_cmp(&b.point.lng))
        });

        let threshold = self.threshold_px(zoom);
        if threshold <= 0.0 {
            return visible.into_iter().map(|m| MarkerGroup::Single(*m)).collect();
        }

        let projected: Vec<(f64, f64)> = visible.iter().map(|m| project(m.point, zoom)).collect();
        let cell_of = |(x, y): (f64, f64)| {
            ((x / threshold).floor() as i64, (y / threshold).floor() as i64)
        };

        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in projected.iter().enumerate() {
            grid.entry(cell_of(*p)).or_default().push(i);
        }

        let mut assigned = vec![false; visible.len()];
        let mut groups = Vec::new();

        for seed in 0..visible.len() {
            if assigned[seed] {
                continue;
            }
            let (cx, cy) = cell_of(projected[seed]);
            let mut members = Vec::new();
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(bucket) = grid.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for &j in bucket {
                        if !assigned[j] && pixel_distance(projected[seed], projected[j]) < threshold {
                            members.push(j);
                        }
                    }
                }
            }
            members.sort_unstable();
            for &j in &members {
                assigned[j] = true;
            }
            groups.push(build_group(&visible, &members));
        }

        debug!(
            zoom,
            threshold_px = threshold,
            markers = visible.len(),
            groups = groups.len(),
            "Planned map markers"
        );
        groups
    }
}

impl Default for ClusterPlanner {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

fn build_group(visible: &[&Marker], members: &[usize]) -> MarkerGroup {
    if let [only] = members {
        return MarkerGroup::Single(*visible[*only]);
    }
    let n = members.len() as f64;
    let lat = members.iter().map(|&i| visible[i].point.lat).sum::<f64>() / n;
    let lng = members.iter().map(|&i| visible[i].point.lng).sum::<f64>() / n;
    MarkerGroup::Cluster(Cluster {
        centroid: GeoPoint::new(lat, lng),
        member_ids: members.iter().map(|&i| visible[i].id).collect(),
    })
}

/// Web Mercator world-pixel coordinates at `zoom`.
pub fn project(point: GeoPoint, zoom: u8) -> (f64, f64) {
    let world = TILE_SIZE * 2f64.powi(i32::from(zoom));
    let x = (point.lng + 180.0) / 360.0 * world;
    let sin_lat = point.lat.to_radians().sin().clamp(-MAX_SIN_LAT, MAX_SIN_LAT);
    let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI)) * world;
    (x, y)
}

fn pixel_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
