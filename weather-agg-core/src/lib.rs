//! Core library for the `weather-agg` aggregator.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider clients behind a common trait, each with its own rate limiter
//! - The concurrent aggregator and its partial-failure handling
//! - The cache key policy and the Redis-backed cache port
//!
//! It is used by `weather-agg-cli`, but the [`WeatherService`] facade can be
//! mounted behind any other transport.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod geocode;
pub mod model;
pub mod provider;
pub mod service;
pub mod throttle;

pub use aggregator::Aggregator;
pub use cache::{AggregateCache, KeyValueStore, MemoryStore, RedisStore, key_for};
pub use config::{Config, ProviderConfig};
pub use error::{CacheError, FailureCause, ProviderFailure, ServiceError, ValidationError};
pub use geocode::{CachingGeocoder, Coordinates, GeocodeError, Geocoder, PhotonGeocoder};
pub use model::{AggregateResult, Location, LocationQuery, ProviderReading};
pub use provider::{ProviderId, RateLimited, WeatherProvider, provider_from_config};
pub use service::{WeatherQuery, WeatherService};
pub use throttle::RateLimiter;
