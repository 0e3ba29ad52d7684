use async_trait::async_trait;
use civicmap_common::{Address, GeoPoint, GeocodeError, GeocoderConfig};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{AddressResolver, MAX_ADDRESS_LEN};

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

/// Geocoder backed by an OpenStreetMap Nominatim-compatible search endpoint.
pub struct NominatimResolver {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    api_key: Option<String>,
    region: Option<String>,
}

impl NominatimResolver {
    pub fn new(config: &GeocoderConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            user_agent: config.user_agent.clone(),
            api_key: config.api_key.clone(),
            region: config.region.clone(),
        })
    }

    fn query_params(&self, address: &Address) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", address.query_string(self.region.as_deref())),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        params
    }
}

#[async_trait]
impl AddressResolver for NominatimResolver {
    async fn resolve(&self, address: &Address) -> Result<GeoPoint, GeocodeError> {
        let text = address.text.trim();
        let len = text.chars().count();
        if len == 0 || len > MAX_ADDRESS_LEN {
            debug!(len, "Address text empty or too long, not geocoding");
            return Err(GeocodeError::NotFound);
        }

        let resp = self
            .client
            .get(&self.url)
            .query(&self.query_params(address))
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, timeout = e.is_timeout(), "Geocoding request failed");
                GeocodeError::ProviderUnavailable
            })?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Geocoding provider returned an error status");
            return Err(GeocodeError::ProviderUnavailable);
        }

        let results: Vec<NominatimResult> = resp.json().await.map_err(|e| {
            warn!(error = %e, "Geocoding response could not be decoded");
            GeocodeError::ProviderUnavailable
        })?;

        let point = first_point(results)?;
        info!(address = text, lat = point.lat, lng = point.lng, "Geocoded address");
        Ok(point)
    }
}

fn first_point(results: Vec<NominatimResult>) -> Result<GeoPoint, GeocodeError> {
    let first = results.into_iter().next().ok_or(GeocodeError::NotFound)?;

    let lat: f64 = first.lat.parse().map_err(|_| GeocodeError::ProviderUnavailable)?;
    let lng: f64 = first.lon.parse().map_err(|_| GeocodeError::ProviderUnavailable)?;
    let point = GeoPoint::new(lat, lng);
    if !point.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
        warn!(lat, lng, "Geocoding provider returned an out-of-range coordinate");
        return Err(GeocodeError::ProviderUnavailable);
    }
    debug!(display_name = first.display_name.as_str(), "Provider match");
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<GeoPoint, GeocodeError> {
        let results: Vec<NominatimResult> = serde_json::from_str(json).unwrap();
        first_point(results)
    }

    #[test]
    fn first_result_wins() {
        let point = parse(
            r#"[{"lat":"40.7484","lon":"-73.9857","display_name":"Empire State Building"},
                {"lat":"0","lon":"0","display_name":"Elsewhere"}]"#,
        )
        .unwrap();
        assert_eq!(point, GeoPoint::new(40.7484, -73.9857));
    }

    #[test]
    fn empty_results_are_not_found() {
        assert_eq!(parse("[]"), Err(GeocodeError::NotFound));
    }

    #[test]
    fn garbage_coordinates_are_provider_errors() {
        assert_eq!(
            parse(r#"[{"lat":"north","lon":"-73.9"}]"#),
            Err(GeocodeError::ProviderUnavailable)
        );
        assert_eq!(
            parse(r#"[{"lat":"123.0","lon":"-73.9"}]"#),
            Err(GeocodeError::ProviderUnavailable)
        );
    }

    #[test]
    fn query_includes_region_and_key() {
        let mut config = GeocoderConfig::default();
        config.region = Some("New York, NY".into());
        config.api_key = Some("secret".into());
        let resolver = NominatimResolver::new(&config).unwrap();
        let params = resolver.query_params(&Address::new("1 Court Sq").with_borough("Queens"));
        assert_eq!(params[0], ("q", "1 Court Sq, Queens, New York, NY".to_string()));
        assert!(params.contains(&("key", "secret".to_string())));
    }

    #[tokio::test]
    async fn empty_address_never_hits_the_network() {
        let config = GeocoderConfig {
            url: "http://127.0.0.1:9/unreachable".into(),
            ..GeocoderConfig::default()
        };
        let resolver = NominatimResolver::new(&config).unwrap();
        assert_eq!(
            resolver.resolve(&Address::new("   ")).await,
            Err(GeocodeError::NotFound)
        );
    }

    #[tokio::test]
    async fn length_cap_counts_characters_not_bytes() {
        let config = GeocoderConfig {
            url: "http://127.0.0.1:9/unreachable".into(),
            timeout_ms: 500,
            ..GeocoderConfig::default()
        };
        let resolver = NominatimResolver::new(&config).unwrap();

        // 150 characters, 300 bytes: within the cap, so the provider is tried.
        let accented = Address::new("é".repeat(150));
        assert_eq!(
            resolver.resolve(&accented).await,
            Err(GeocodeError::ProviderUnavailable)
        );

        let too_long = Address::new("é".repeat(MAX_ADDRESS_LEN + 1));
        assert_eq!(resolver.resolve(&too_long).await, Err(GeocodeError::NotFound));
    }
}
