use civicmap_common::GeoPoint;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude, treated as constant at street scale.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Floor for the longitude scale so offsets stay finite next to the poles.
const MIN_LNG_SCALE: f64 = 0.01;

/// Haversine distance between two lat/lng points in meters.
pub fn haversine_distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_distance_meters(a.lat, a.lng, b.lat, b.lng)
}

/// Move `origin` by `north_m` meters north and `east_m` meters east.
///
/// Uses the local latitude of `origin` to scale longitude, which is accurate to
/// well under a centimeter for offsets of a few meters.
pub fn offset_meters(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lng_scale = origin.lat.to_radians().cos().abs().max(MIN_LNG_SCALE);
    GeoPoint {
        lat: origin.lat + north_m / METERS_PER_DEGREE_LAT,
        lng: origin.lng + east_m / (METERS_PER_DEGREE_LAT * lng_scale),
    }
}
