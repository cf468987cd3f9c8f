use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::DEFAULT_REQUEST_TIMEOUT_SECS,
    error::ProviderFailure,
    model::{Location, ProviderReading},
    provider::{ProviderId, read_json, unix_to_utc},
};

use super::WeatherProvider;

pub const WEATHERAPI_URL: &str = "https://api.weatherapi.com";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: WEATHERAPI_URL.to_string(),
            timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
            http,
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
struct WaCondition {
    text: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: Option<f64>,
    humidity: Option<u8>,
    pressure_mb: Option<f64>,
    wind_kph: Option<f64>,
    condition: Option<WaCondition>,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    current: WaCurrent,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    async fn fetch(&self, location: &Location) -> Result<ProviderReading, ProviderFailure> {
        let url = format!("{}/v1/current.json", self.base_url);
        let query = location.qualified_name();

        let res = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", query.as_str())])
            .send()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(self.id(), &e, self.timeout))?;

        let parsed: WaResponse = read_json(self.id(), res, self.timeout).await?;
        let current = parsed.current;

        let observed_at = current.last_updated_epoch.and_then(unix_to_utc).unwrap_or_else(Utc::now);
        let (description, icon) = match current.condition {
            Some(c) => (c.text, c.icon.map(absolute_icon_url)),
            None => (None, None),
        };

        Ok(ProviderReading {
            provider: self.id(),
            temperature: current.temp_c,
            feels_like: current.feelslike_c,
            humidity: current.humidity,
            pressure: current.pressure_mb,
            wind_speed: current.wind_kph.map(|kph| kph / 3.6),
            description,
            icon,
            observed_at,
        })
    }
}

/// WeatherAPI returns protocol-relative icon paths (`//cdn.weatherapi.com/...`).
fn absolute_icon_url(icon: String) -> String {
    if icon.starts_with("//") { format!("https:{icon}") } else { icon }
}
