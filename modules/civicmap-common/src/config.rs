use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CivicMapError;
use crate::types::LayoutPolicy;

/// Hard ceiling for how far a display coordinate may drift from its raw coordinate.
pub const MAX_DISPLAY_OFFSET_METERS: f64 = 10.0;

/// Largest sibling tolerance the placement index can honor: one length-7 geohash
/// cell is ~0.00137° on each axis and only a cell and its neighbours are searched.
pub const MAX_SIBLING_EPSILON_DEGREES: f64 = 0.001;

/// Engine configuration.
///
/// Defaults are usable as-is; a TOML file may override them and environment
/// variables override both. Secrets (the geocoder API key) come from the
/// environment only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub geocoder: GeocoderConfig,
    pub placement: PlacementConfig,
    pub clustering: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub url: String,
    pub user_agent: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub cache_capacity: usize,
    /// Appended to every provider query, e.g. "New York, NY".
    pub region: Option<String>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "civicmap/0.1".to_string(),
            api_key: None,
            timeout_ms: 5_000,
            cache_capacity: 1_024,
            region: None,
        }
    }
}

impl GeocoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Radius of the circle co-located posts are spread on.
    pub radius_meters: f64,
    /// Two raw coordinates closer than this (per axis, degrees) share an address.
    pub sibling_epsilon_degrees: f64,
    pub layout: LayoutPolicy,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            radius_meters: 8.0,
            sibling_epsilon_degrees: 1e-6,
            layout: LayoutPolicy::Reflow,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Grouping distance at zoom 0, in screen pixels. Shrinks linearly to zero at `max_zoom`.
    pub radius_px: f64,
    /// At or above this zoom nothing is clustered.
    pub max_zoom: u8,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius_px: 60.0,
            max_zoom: 17,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, CivicMapError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        config.log_config();
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, CivicMapError> {
        dotenvy::dotenv().ok();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CivicMapError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        config.log_config();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CivicMapError> {
        toml::from_str(content)
            .map_err(|e| CivicMapError::Config(format!("Failed to parse config: {e}")))
    }

    fn apply_env(&mut self) -> Result<(), CivicMapError> {
        let g = &mut self.geocoder;
        if let Ok(url) = env::var("GEOCODER_URL") {
            g.url = url;
        }
        if let Ok(agent) = env::var("GEOCODER_USER_AGENT") {
            g.user_agent = agent;
        }
        g.api_key = env::var("GEOCODER_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(region) = env::var("GEOCODER_REGION") {
            g.region = Some(region).filter(|r| !r.trim().is_empty());
        }
        override_parsed("GEOCODER_TIMEOUT_MS", &mut g.timeout_ms)?;
        override_parsed("GEOCODER_CACHE_CAPACITY", &mut g.cache_capacity)?;

        let p = &mut self.placement;
        override_parsed("COLLISION_RADIUS_METERS", &mut p.radius_meters)?;
        override_parsed("SIBLING_EPSILON_DEGREES", &mut p.sibling_epsilon_degrees)?;
        if let Ok(policy) = env::var("LAYOUT_POLICY") {
            p.layout = policy
                .parse()
                .map_err(|e| CivicMapError::Config(format!("LAYOUT_POLICY: {e}")))?;
        }

        let c = &mut self.clustering;
        override_parsed("CLUSTER_RADIUS_PX", &mut c.radius_px)?;
        override_parsed("CLUSTER_MAX_ZOOM", &mut c.max_zoom)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CivicMapError> {
        let r = self.placement.radius_meters;
        if !(r > 0.0 && r <= MAX_DISPLAY_OFFSET_METERS) {
            return Err(CivicMapError::Config(format!(
                "placement radius must be in (0, {MAX_DISPLAY_OFFSET_METERS}] meters, got {r}"
            )));
        }
        let eps = self.placement.sibling_epsilon_degrees;
        if !(eps > 0.0 && eps <= MAX_SIBLING_EPSILON_DEGREES) {
            return Err(CivicMapError::Config(format!(
                "sibling epsilon must be in (0, {MAX_SIBLING_EPSILON_DEGREES}] degrees, got {eps}"
            )));
        }
        if self.geocoder.timeout_ms == 0 {
            return Err(CivicMapError::Config("geocoder timeout must be non-zero".into()));
        }
        if !(self.clustering.radius_px >= 0.0 && self.clustering.radius_px.is_finite()) {
            return Err(CivicMapError::Config(format!(
                "cluster radius must be non-negative, got {}",
                self.clustering.radius_px
            )));
        }
        Ok(())
    }

    fn log_config(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  GEOCODER_URL: {}", self.geocoder.url);
        tracing::info!(
            "  GEOCODER_API_KEY: {}",
            if self.geocoder.api_key.is_some() { "<set>" } else { "<not set>" }
        );
        tracing::info!("  GEOCODER_TIMEOUT_MS: {}", self.geocoder.timeout_ms);
        tracing::info!("  COLLISION_RADIUS_METERS: {}", self.placement.radius_meters);
        tracing::info!("  LAYOUT_POLICY: {:?}", self.placement.layout);
        tracing::info!(
            "  CLUSTER: radius_px={} max_zoom={}",
            self.clustering.radius_px,
            self.clustering.max_zoom
        );
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T) -> Result<(), CivicMapError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| CivicMapError::Config(format!("{key} must be a number: {e}")))?;
    }
    Ok(())
}
