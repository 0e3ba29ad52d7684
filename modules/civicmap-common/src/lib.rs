pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClusterConfig, EngineConfig, GeocoderConfig, PlacementConfig, MAX_DISPLAY_OFFSET_METERS,
    MAX_SIBLING_EPSILON_DEGREES,
};
pub use error::{CivicMapError, GeocodeError, ValidationError};
pub use types::*;
