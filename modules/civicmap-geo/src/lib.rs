pub mod bounds;
pub mod cluster;
pub mod collision;
pub mod distance;

pub use bounds::ViewportBounds;
pub use cluster::{Cluster, ClusterPlanner, Marker, MarkerGroup};
pub use collision::CollisionResolver;
pub use distance::{distance_meters, haversine_distance_meters, offset_meters};
