use std::time::{Duration, Instant};

use anyhow::Context;

use crate::{
    Config,
    aggregator::Aggregator,
    cache::{AggregateCache, KeyValueStore, RedisStore, key_for},
    error::ServiceError,
    model::AggregateResult,
};

/// The inbound operation as a transport layer sees it.
#[derive(Debug, Clone, Default)]
pub struct WeatherQuery {
    pub place_name: String,
    pub country_code: Option<String>,
    /// Provider names; `None` or empty means every active provider.
    pub providers: Option<Vec<String>>,
    pub use_cache: bool,
    /// Skip the cache read but still write the fresh aggregate.
    pub force_refresh: bool,
}

impl WeatherQuery {
    pub fn new(place_name: impl Into<String>) -> Self {
        Self { place_name: place_name.into(), ..Self::default() }
    }
}

pub type DynCache = AggregateCache<Box<dyn KeyValueStore>>;

/// Aggregator plus cache, built once at startup and shared by reference.
#[derive(Debug)]
pub struct WeatherService {
    aggregator: Aggregator,
    cache: Option<DynCache>,
    cache_ttl: Duration,
}

impl WeatherService {
    pub fn new(aggregator: Aggregator, cache: Option<DynCache>, cache_ttl: Duration) -> Self {
        Self { aggregator, cache, cache_ttl }
    }

    /// Wires provider clients and the Redis cache from configuration.
    /// Redis is not contacted until the first cached request.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let aggregator = Aggregator::from_config(config)?;
        let store = RedisStore::new(&config.redis_url).context("Failed to configure cache store")?;
        let cache = AggregateCache::new(Box::new(store) as Box<dyn KeyValueStore>);

        Ok(Self::new(aggregator, Some(cache), config.cache_ttl()))
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn list_available_providers(&self) -> Vec<String> {
        self.aggregator.active_providers().iter().map(|id| id.to_string()).collect()
    }

    pub async fn get_weather(&self, query: &WeatherQuery) -> Result<AggregateResult, ServiceError> {
        let started = Instant::now();
        let resolved = self.aggregator.resolve_query(
            &query.place_name,
            query.country_code.as_deref(),
            query.providers.as_deref(),
        )?;

        let cache = self.cache.as_ref().filter(|_| query.use_cache);
        let key = key_for(
            &resolved.location.place_name,
            resolved.location.country_code.as_deref(),
            &resolved.providers,
        );

        if let Some(cache) = cache.filter(|_| !query.force_refresh) {
            if let Some(hit) = cache.get(&key).await? {
                return Ok(hit);
            }
        }

        let result = self.aggregator.aggregate(&resolved).await;

        if let Some(cache) = cache {
            cache.set(&key, &result, self.cache_ttl).await?;
            tracing::debug!(key, ttl_secs = self.cache_ttl.as_secs(), "cached aggregate");
        }

        tracing::info!(
            place = %resolved.location.place_name,
            providers = resolved.providers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "weather request served"
        );

        Ok(result)
    }

    /// Tears down the cache connection.
    pub async fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.disconnect().await;
        }
    }
}
