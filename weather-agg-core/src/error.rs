use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderId;

/// Request-level rejection raised before any provider is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("place name must be at least {min} characters, got {got:?}")]
    PlaceNameTooShort { min: usize, got: String },

    #[error("country code must be two ASCII letters, got {0:?}")]
    InvalidCountryCode(String),

    #[error("Unknown provider '{0}'. Supported providers: meteoblue, openweather, weatherapi.")]
    UnknownProvider(String),

    #[error("Unsupported providers: {}", .0.join(", "))]
    InactiveProviders(Vec<String>),

    #[error("no providers are active")]
    NoActiveProviders,
}

/// Why a single provider call produced no reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("geocoding failed: {0}")]
    Geocoding(String),

    #[error("client aborted: {0}")]
    Aborted(String),
}

/// A failed provider call. Always recovered by the aggregator and turned into
/// an `errors` entry of the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {cause}")]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub cause: FailureCause,
}

impl ProviderFailure {
    pub fn new(provider: ProviderId, cause: FailureCause) -> Self {
        Self { provider, cause }
    }

    /// Classifies a reqwest error, keeping timeouts distinct from other
    /// transport problems.
    pub(crate) fn from_reqwest(provider: ProviderId, err: &reqwest::Error, timeout: Duration) -> Self {
        let cause = if err.is_timeout() {
            FailureCause::Timeout(timeout)
        } else if err.is_decode() {
            FailureCause::Payload(err.to_string())
        } else {
            FailureCause::Transport(err.to_string())
        };
        Self::new(provider, cause)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unreachable: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("failed to (de)serialize cached aggregate: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

/// Errors surfaced by [`crate::WeatherService::get_weather`].
///
/// Provider failures never appear here; they are data inside the aggregate.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ServiceError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }
}
