use crate::{
    Config,
    error::{FailureCause, ProviderFailure, ValidationError},
    geocode::{CachingGeocoder, PhotonGeocoder},
    model::{Location, ProviderReading},
    provider::{
        meteoblue::MeteoblueProvider, openweather::OpenWeatherProvider,
        weatherapi::WeatherApiProvider,
    },
    throttle::RateLimiter,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt::Debug, str::FromStr, sync::Arc, time::Duration};

pub mod meteoblue;
pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Meteoblue,
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Meteoblue => "meteoblue",
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::Meteoblue, ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "meteoblue" => Ok(ProviderId::Meteoblue),
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(ValidationError::UnknownProvider(value.to_string())),
        }
    }
}

/// A single weather provider. Implementations never panic or error out of
/// `fetch`; every problem becomes a [`ProviderFailure`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, location: &Location) -> Result<ProviderReading, ProviderFailure>;
}

/// Gates every call of the wrapped provider on its own [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimited<P> {
    inner: P,
    limiter: RateLimiter,
}

impl<P: WeatherProvider> RateLimited<P> {
    pub fn new(inner: P, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl<P: WeatherProvider> WeatherProvider for RateLimited<P> {
    fn id(&self) -> ProviderId {
        self.inner.id()
    }

    async fn fetch(&self, location: &Location) -> Result<ProviderReading, ProviderFailure> {
        let _permit = self.limiter.acquire().await;
        self.inner.fetch(location).await
    }
}

/// Construct a rate-limited provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider_config = config.provider_config(id).filter(|pc| !pc.api_key.is_empty());
    let provider_config = provider_config.ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather-agg configure {id}` and enter your API key."
        )
    })?;

    let api_key = provider_config.api_key.clone();
    let base_url = provider_config.base_url.as_deref();
    let timeout = config.request_timeout();
    let http = http_client(timeout).with_context(|| format!("Failed to build HTTP client for '{id}'"))?;
    let limiter = RateLimiter::per_minute(config.max_requests_per_minute);

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::Meteoblue => {
            let geocoder = match &config.geocoder_url {
                Some(url) => PhotonGeocoder::with_base_url(url, timeout),
                None => PhotonGeocoder::new(timeout),
            }
            .context("Failed to build geocoding client")?;
            let client = MeteoblueProvider::new(api_key, http, Arc::new(CachingGeocoder::new(geocoder)))
                .with_timeout(timeout);
            let client = match base_url {
                Some(url) => client.with_base_url(url),
                None => client,
            };
            Arc::new(RateLimited::new(client, limiter))
        }
        ProviderId::OpenWeather => {
            let client = OpenWeatherProvider::new(api_key, http).with_timeout(timeout);
            let client = match base_url {
                Some(url) => client.with_base_url(url),
                None => client,
            };
            Arc::new(RateLimited::new(client, limiter))
        }
        ProviderId::WeatherApi => {
            let client = WeatherApiProvider::new(api_key, http).with_timeout(timeout);
            let client = match base_url {
                Some(url) => client.with_base_url(url),
                None => client,
            };
            Arc::new(RateLimited::new(client, limiter))
        }
    };

    Ok(provider)
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(5)
        .build()
}

/// Reads a response body and decodes it as JSON, mapping every failure mode
/// to the provider's [`FailureCause`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: ProviderId,
    res: Response,
    timeout: Duration,
) -> Result<T, ProviderFailure> {
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| ProviderFailure::from_reqwest(provider, &e, timeout))?;

    if !status.is_success() {
        return Err(ProviderFailure::new(
            provider,
            FailureCause::Status { status: status.as_u16(), body: truncate_body(&body) },
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| ProviderFailure::new(provider, FailureCause::Payload(e.to_string())))
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed: ProviderId = s.parse().expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn provider_id_parse_is_case_insensitive() {
        assert_eq!("OpenWeather".parse::<ProviderId>().unwrap(), ProviderId::OpenWeather);
        assert_eq!(" METEOBLUE ".parse::<ProviderId>().unwrap(), ProviderId::Meteoblue);
    }

    #[test]
    fn unknown_provider_error() {
        let err = "doesnotexist".parse::<ProviderId>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownProvider("doesnotexist".into()));
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_id_serializes_lowercase() {
        let json = serde_json::to_string(&ProviderId::WeatherApi).unwrap();
        assert_eq!(json, "\"weatherapi\"");
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No API key configured for provider"));
        assert!(msg.contains("Hint: run `weather-agg configure openweather`"));
    }

    #[test]
    fn provider_from_config_builds_every_provider() {
        let mut cfg = Config::default();
        for id in ProviderId::all() {
            cfg.upsert_provider_api_key(*id, "KEY".to_string());
        }

        for id in ProviderId::all() {
            let provider = provider_from_config(*id, &cfg).expect("provider should build");
            assert_eq!(provider.id(), *id);
        }
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "ж".repeat(300);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_body("short"), "short");
    }

    #[derive(Debug, Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WeatherProvider for Counting {
        fn id(&self) -> ProviderId {
            ProviderId::OpenWeather
        }

        async fn fetch(&self, _location: &Location) -> Result<ProviderReading, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderReading::bare(ProviderId::OpenWeather, 1.0))
        }
    }

    #[tokio::test]
    async fn rate_limited_consumes_budget_per_call() {
        let provider = RateLimited::new(Counting::default(), RateLimiter::new(2, Duration::from_millis(100)));
        let location = Location::new("Paris", None).unwrap();

        provider.fetch(&location).await.unwrap();
        provider.fetch(&location).await.unwrap();

        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
        assert!(provider.limiter().try_acquire().is_none());
    }
}
