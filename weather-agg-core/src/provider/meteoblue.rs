use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::DEFAULT_REQUEST_TIMEOUT_SECS,
    error::{FailureCause, ProviderFailure},
    geocode::Geocoder,
    model::{Location, ProviderReading},
    provider::{ProviderId, read_json},
};

use super::WeatherProvider;

pub const METEOBLUE_URL: &str = "https://my.meteoblue.com";

/// meteoblue is queried by coordinates, so every call first resolves the
/// place name through a [`Geocoder`].
#[derive(Debug, Clone)]
pub struct MeteoblueProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
    geocoder: Arc<dyn Geocoder>,
}

impl MeteoblueProvider {
    pub fn new(api_key: String, http: Client, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            api_key,
            base_url: METEOBLUE_URL.to_string(),
            timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
            http,
            geocoder,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct MbCurrent {
    temperature: f64,
    windspeed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MbResponse {
    data_current: MbCurrent,
}

#[async_trait]
impl WeatherProvider for MeteoblueProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Meteoblue
    }

    async fn fetch(&self, location: &Location) -> Result<ProviderReading, ProviderFailure> {
        // Photon ranks "<place>, <cc>" better than a bare name for ambiguous places.
        let lookup = match &location.country_code {
            Some(cc) => format!("{}, {}", location.place_name, cc),
            None => location.place_name.clone(),
        };

        let coords = self
            .geocoder
            .resolve(&lookup)
            .await
            .map_err(|e| ProviderFailure::new(self.id(), FailureCause::Geocoding(e.to_string())))?;

        let url = format!("{}/packages/current", self.base_url);
        let lat = coords.latitude.to_string();
        let lon = coords.longitude.to_string();

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("apikey", self.api_key.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(self.id(), &e, self.timeout))?;

        let parsed: MbResponse = read_json(self.id(), res, self.timeout).await?;

        Ok(ProviderReading {
            wind_speed: parsed.data_current.windspeed,
            ..ProviderReading::bare(self.id(), parsed.data_current.temperature)
        })
    }
}
