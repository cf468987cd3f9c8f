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

pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: OPENWEATHER_URL.to_string(),
            timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// The deadline the HTTP client enforces, reported in timeout failures.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: Option<f64>,
    humidity: Option<u8>,
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    dt: Option<i64>,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn fetch(&self, location: &Location) -> Result<ProviderReading, ProviderFailure> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let query = location.qualified_name();

        let res = self
            .http
            .get(&url)
            .query(&[
                ("q", query.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| ProviderFailure::from_reqwest(self.id(), &e, self.timeout))?;

        let parsed: OwCurrentResponse = read_json(self.id(), res, self.timeout).await?;

        let observed_at = parsed.dt.and_then(unix_to_utc).unwrap_or_else(Utc::now);
        let weather = parsed.weather.into_iter().next();

        Ok(ProviderReading {
            provider: self.id(),
            temperature: parsed.main.temp,
            feels_like: parsed.main.feels_like,
            humidity: parsed.main.humidity,
            pressure: parsed.main.pressure,
            wind_speed: parsed.wind.and_then(|w| w.speed),
            description: weather.as_ref().map(|w| w.description.clone()),
            icon: weather
                .and_then(|w| w.icon)
                .map(|icon| format!("https://openweathermap.org/img/wn/{icon}.png")),
            observed_at,
        })
    }
}
