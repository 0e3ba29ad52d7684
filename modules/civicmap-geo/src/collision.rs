//! Display-coordinate assignment for posts that share one geocoded point.
//!
//! Several posts at the same address would otherwise stack into a single marker.
//! Members of such a group are spread on a small circle around the raw point so
//! every one of them stays clickable.

use std::f64::consts::PI;

use civicmap_common::{GeoPoint, LayoutPolicy, PlacementConfig, MAX_DISPLAY_OFFSET_METERS};

use crate::distance::offset_meters;

/// π·(3 − √5): successive slots never line up with each other.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Upper bound for the free-slot search under [`LayoutPolicy::Stable`].
const MAX_STABLE_SLOTS: usize = 4_096;

#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    radius_meters: f64,
    policy: LayoutPolicy,
}

impl CollisionResolver {
    /// `radius_meters` is clamped to [`MAX_DISPLAY_OFFSET_METERS`].
    pub fn new(radius_meters: f64, policy: LayoutPolicy) -> Self {
        Self {
            radius_meters: radius_meters.clamp(0.0, MAX_DISPLAY_OFFSET_METERS),
            policy,
        }
    }

    pub fn from_config(config: &PlacementConfig) -> Self {
        Self::new(config.radius_meters, config.layout)
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub fn policy(&self) -> LayoutPolicy {
        self.policy
    }

    /// Display coordinate for the member at ordinal `index` of a group made of
    /// `siblings` plus the new point. Ordinals follow creation order.
    ///
    /// With no siblings the raw point is returned untouched.
    pub fn assign_display(&self, raw: GeoPoint, siblings: &[GeoPoint], index: usize) -> GeoPoint {
        if siblings.is_empty() {
            return raw;
        }
        match self.policy {
            LayoutPolicy::Reflow => self.ring_point(raw, index, siblings.len() + 1),
            LayoutPolicy::Stable => self.slot_point(raw, index),
        }
    }

    /// Evenly spread layout for a whole group of `n` members, in ordinal order.
    pub fn layout(&self, raw: GeoPoint, n: usize) -> Vec<GeoPoint> {
        if n <= 1 {
            return vec![raw; n];
        }
        (0..n).map(|i| self.ring_point(raw, i, n)).collect()
    }

    /// Point `i` of `n` on the circle. Angle 0 is due north, increasing clockwise.
    pub fn ring_point(&self, raw: GeoPoint, i: usize, n: usize) -> GeoPoint {
        let theta = 2.0 * PI * i as f64 / n.max(1) as f64;
        offset_meters(
            raw,
            self.radius_meters * theta.cos(),
            self.radius_meters * theta.sin(),
        )
    }

    /// Fixed position of slot `k` under the stable policy: slot 0 is the raw
    /// point, later slots walk the circle in golden-angle steps.
    pub fn slot_point(&self, raw: GeoPoint, k: usize) -> GeoPoint {
        if k == 0 {
            return raw;
        }
        let theta = GOLDEN_ANGLE * (k - 1) as f64;
        offset_meters(
            raw,
            self.radius_meters * theta.cos(),
            self.radius_meters * theta.sin(),
        )
    }

    /// First stable slot not already occupied by one of `taken`.
    pub fn first_free_slot(&self, raw: GeoPoint, taken: &[GeoPoint], epsilon: f64) -> GeoPoint {
        (0..MAX_STABLE_SLOTS)
            .map(|k| self.slot_point(raw, k))
            .find(|candidate| !taken.iter().any(|t| t.approx_eq(candidate, epsilon)))
            .unwrap_or_else(|| self.slot_point(raw, taken.len()))
    }
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self::from_config(&PlacementConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{distance_meters, METERS_PER_DEGREE_LAT};

    fn raw() -> GeoPoint {
        GeoPoint::new(40.6892, -73.9442)
    }

    #[test]
    fn lone_point_stays_on_raw() {
        let r = CollisionResolver::default();
        assert_eq!(r.assign_display(raw(), &[], 0), raw());
    }

    #[test]
    fn index_zero_sits_due_north() {
        let r = CollisionResolver::default();
        let p = r.assign_display(raw(), &[raw()], 0);
        assert!((p.lat - raw().lat - 8.0 / METERS_PER_DEGREE_LAT).abs() < 1e-12);
        assert!((p.lng - raw().lng).abs() < 1e-12);
    }

    #[test]
    fn group_members_are_distinct_and_within_radius() {
        let r = CollisionResolver::default();
        for n in 2..12 {
            let points = r.layout(raw(), n);
            for (i, a) in points.iter().enumerate() {
                let d = distance_meters(raw(), *a);
                assert!(d <= MAX_DISPLAY_OFFSET_METERS, "n={n} i={i} d={d}");
                for b in &points[i + 1..] {
                    assert!(distance_meters(*a, *b) > 0.5, "n={n} collision");
                }
            }
        }
    }

    #[test]
    fn assign_display_matches_layout() {
        let r = CollisionResolver::default();
        let layout = r.layout(raw(), 3);
        for (i, expected) in layout.iter().enumerate() {
            assert_eq!(r.assign_display(raw(), &[raw(), raw()], i), *expected);
        }
    }

    #[test]
    fn stable_slots_never_move() {
        let r = CollisionResolver::new(8.0, LayoutPolicy::Stable);
        let first = r.assign_display(raw(), &[raw()], 1);
        let again = r.assign_display(raw(), &[raw(), raw(), raw()], 1);
        assert_eq!(first, again);
        assert_eq!(r.assign_display(raw(), &[raw()], 0), raw());
    }

    #[test]
    fn first_free_slot_fills_gaps() {
        let r = CollisionResolver::new(8.0, LayoutPolicy::Stable);
        let taken = vec![r.slot_point(raw(), 0), r.slot_point(raw(), 2)];
        assert_eq!(r.first_free_slot(raw(), &taken, 1e-7), r.slot_point(raw(), 1));
    }

    #[test]
    fn radius_is_clamped() {
        let r = CollisionResolver::new(50.0, LayoutPolicy::Reflow);
        assert_eq!(r.radius_meters(), MAX_DISPLAY_OFFSET_METERS);
    }
}
