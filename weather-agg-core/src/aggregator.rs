//! Concurrent fan-out to provider clients and assembly of the aggregate.
//!
//! Every provider call runs in its own task under the shared per-call
//! deadline. The aggregator waits for all of them to settle, then folds
//! failures (including timeouts and panics) into the `errors` list. Dropping
//! an in-flight aggregation aborts its outstanding provider tasks.

use std::{
    any::Any,
    collections::{BTreeMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};

use crate::{
    Config,
    error::{FailureCause, ProviderFailure, ValidationError},
    model::{AggregateResult, Location, LocationQuery, ProviderReading, TemperatureStats},
    provider::{ProviderId, WeatherProvider, provider_from_config},
};

#[derive(Debug, Clone)]
pub struct Aggregator {
    providers: BTreeMap<ProviderId, Arc<dyn WeatherProvider>>,
    active: Vec<ProviderId>,
    request_timeout: Duration,
}

impl Aggregator {
    /// The active set is exactly the given providers, in the given order.
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>, request_timeout: Duration) -> Self {
        let mut active = Vec::with_capacity(providers.len());
        let mut by_id = BTreeMap::new();

        for provider in providers {
            let id = provider.id();
            if by_id.insert(id, provider).is_none() {
                active.push(id);
            }
        }

        Self { providers: by_id, active, request_timeout }
    }

    /// Builds one long-lived, rate-limited client per active provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let providers = config
            .active_provider_ids()?
            .into_iter()
            .map(|id| provider_from_config(id, config))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::new(providers, config.request_timeout()))
    }

    pub fn active_providers(&self) -> &[ProviderId] {
        &self.active
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Validates a raw request against the active set. An absent or empty
    /// provider list selects every active provider.
    pub fn resolve_query(
        &self,
        place_name: &str,
        country_code: Option<&str>,
        providers: Option<&[String]>,
    ) -> Result<LocationQuery, ValidationError> {
        let location = Location::new(place_name, country_code)?;

        if self.active.is_empty() {
            return Err(ValidationError::NoActiveProviders);
        }

        let requested = match providers {
            Some(names) if !names.is_empty() => names,
            _ => return Ok(LocationQuery { location, providers: self.active.clone() }),
        };

        let mut ids = Vec::with_capacity(requested.len());
        let mut inactive = Vec::new();
        for name in requested {
            let id: ProviderId = name.parse()?;
            if !self.active.contains(&id) {
                inactive.push(name.clone());
            } else if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if !inactive.is_empty() {
            return Err(ValidationError::InactiveProviders(inactive));
        }

        Ok(LocationQuery { location, providers: ids })
    }

    /// Validates the request, then fans out to every selected provider.
    ///
    /// Cancel-safe: if the returned future is dropped before it completes,
    /// every provider call it started is aborted.
    pub async fn get_weather(
        &self,
        place_name: &str,
        country_code: Option<&str>,
        providers: Option<&[String]>,
    ) -> Result<AggregateResult, ValidationError> {
        let started = Instant::now();
        let query = self.resolve_query(place_name, country_code, providers)?;
        Ok(self.run(&query, started).await)
    }

    /// Fans out an already validated query.
    pub async fn aggregate(&self, query: &LocationQuery) -> AggregateResult {
        self.run(query, Instant::now()).await
    }

    async fn run(&self, query: &LocationQuery, started: Instant) -> AggregateResult {
        let mut seen = HashSet::new();
        let providers_queried: Vec<ProviderId> =
            query.providers.iter().copied().filter(|id| seen.insert(*id)).collect();

        let handles = providers_queried.iter().map(|&id| {
            let provider = self.providers.get(&id).cloned();
            let location = query.location.clone();
            let timeout = self.request_timeout;

            AbortOnDrop(tokio::spawn(async move {
                let Some(provider) = provider else {
                    return Err(ProviderFailure::new(
                        id,
                        FailureCause::Aborted("no client registered".to_string()),
                    ));
                };
                match tokio::time::timeout(timeout, provider.fetch(&location)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProviderFailure::new(id, FailureCause::Timeout(timeout))),
                }
            }))
        });

        let settled = join_all(handles).await;

        let mut readings_by_provider = BTreeMap::new();
        let mut errors = Vec::new();

        for (&id, joined) in providers_queried.iter().zip(settled) {
            match joined.unwrap_or_else(|e| Err(aborted(id, e))) {
                Ok(reading) => {
                    readings_by_provider.insert(id, ProviderReading { provider: id, ..reading });
                }
                Err(failure) => {
                    tracing::warn!(provider = %id, cause = %failure.cause, "provider call failed");
                    errors.push(format!("{id}: {}", failure.cause));
                }
            }
        }

        let stats = TemperatureStats::from_temperatures(
            readings_by_provider.values().map(|r: &ProviderReading| r.temperature),
        );
        let elapsed_seconds = started.elapsed().as_secs_f64();

        tracing::debug!(
            place = %query.location.place_name,
            succeeded = readings_by_provider.len(),
            failed = errors.len(),
            elapsed_seconds,
            "aggregated weather"
        );

        AggregateResult {
            location: query.location.clone(),
            providers_queried,
            average_temperature: stats.average,
            min_temperature: stats.min,
            max_temperature: stats.max,
            readings_by_provider,
            errors,
            from_cache: false,
            elapsed_seconds,
        }
    }
}

/// Owns a spawned provider call and aborts it when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn aborted(id: ProviderId, err: JoinError) -> ProviderFailure {
    let message = if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic()))
    } else {
        "cancelled".to_string()
    };
    ProviderFailure::new(id, FailureCause::Aborted(message))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
