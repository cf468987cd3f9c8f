//! Place-name to coordinate lookup for coordinate-based providers.
//! The default backend is Photon (komoot), free and keyless.

use std::{collections::HashMap, fmt::Debug, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PHOTON_URL: &str = "https://photon.komoot.io";
const USER_AGENT: &str = concat!("weather-agg/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("no match for '{0}'")]
    NotFound(String),

    #[error("lookup request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    async fn resolve(&self, place_name: &str) -> Result<Coordinates, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct PhotonGeocoder {
    base_url: String,
    http: Client,
}

impl PhotonGeocoder {
    pub fn new(timeout: Duration) -> Result<Self, GeocodeError> {
        Self::with_base_url(PHOTON_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, GeocodeError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }
}

#[derive(Debug, Deserialize)]
struct PhotonResponse {
    features: Vec<PhotonFeature>,
}

#[derive(Debug, Deserialize)]
struct PhotonFeature {
    geometry: PhotonGeometry,
}

#[derive(Debug, Deserialize)]
struct PhotonGeometry {
    /// GeoJSON order: `[lon, lat]`.
    coordinates: [f64; 2],
}

#[async_trait]
impl Geocoder for PhotonGeocoder {
    async fn resolve(&self, place_name: &str) -> Result<Coordinates, GeocodeError> {
        let url = format!("{}/api", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("q", place_name), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(GeocodeError::Request(format!("status {status}")));
        }

        let body: PhotonResponse =
            res.json().await.map_err(|e| GeocodeError::Request(e.to_string()))?;

        let feature = body
            .features
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(place_name.to_string()))?;

        let [longitude, latitude] = feature.geometry.coordinates;
        tracing::debug!(place_name, latitude, longitude, "geocoded");

        Ok(Coordinates { latitude, longitude })
    }
}

/// Memoizes successful lookups of an inner geocoder. Failures are not cached,
/// so a transient outage is retried on the next call.
#[derive(Debug)]
pub struct CachingGeocoder<G> {
    inner: G,
    resolved: Mutex<HashMap<String, Coordinates>>,
}

impl<G: Geocoder> CachingGeocoder<G> {
    pub fn new(inner: G) -> Self {
        Self { inner, resolved: Mutex::new(HashMap::new()) }
    }

    pub fn cached_len(&self) -> usize {
        self.resolved.lock().len()
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachingGeocoder<G> {
    async fn resolve(&self, place_name: &str) -> Result<Coordinates, GeocodeError> {
        let key = place_name.trim().to_lowercase();

        let cached = self.resolved.lock().get(&key).copied();
        if let Some(coords) = cached {
            return Ok(coords);
        }

        let coords = self.inner.resolve(place_name).await?;
        self.resolved.lock().insert(key, coords);
        Ok(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for CountingGeocoder {
        async fn resolve(&self, place_name: &str) -> Result<Coordinates, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if place_name.starts_with("Nowhere") {
                return Err(GeocodeError::NotFound(place_name.to_string()));
            }
            Ok(Coordinates { latitude: 51.67, longitude: 39.19 })
        }
    }

    #[tokio::test]
    async fn caching_geocoder_resolves_each_place_once() {
        let geocoder = CachingGeocoder::new(CountingGeocoder::default());

        let first = geocoder.resolve("Voronezh").await.unwrap();
        let second = geocoder.resolve(" voronezh ").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(geocoder.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(geocoder.cached_len(), 1);
    }

    #[tokio::test]
    async fn caching_geocoder_does_not_cache_failures() {
        let geocoder = CachingGeocoder::new(CountingGeocoder::default());

        assert!(geocoder.resolve("Nowhere").await.is_err());
        assert!(geocoder.resolve("Nowhere").await.is_err());

        assert_eq!(geocoder.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(geocoder.cached_len(), 0);
    }
}
