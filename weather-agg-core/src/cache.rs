//! Cache key policy and the cache port in front of the aggregator.
//!
//! Aggregates are stored as JSON strings in a key-value store with
//! `GET` / `SETEX` semantics. Redis is the production store; [`MemoryStore`]
//! implements the same port in process.

use std::{
    collections::HashMap,
    fmt::{self, Debug},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::{error::CacheError, model::AggregateResult, provider::ProviderId};

pub const KEY_PREFIX: &str = "weather";
pub const ANY_COUNTRY: &str = "any";
const PROVIDER_SEPARATOR: &str = "_";

/// Deterministic cache key for a query shape:
/// `weather:<place>:<country|any>:<sorted providers joined by '_'>`.
pub fn key_for(place_name: &str, country_code: Option<&str>, providers: &[ProviderId]) -> String {
    let mut names: Vec<&str> = providers.iter().map(ProviderId::as_str).collect();
    names.sort_unstable();
    names.dedup();

    let country = country_code.filter(|cc| !cc.is_empty()).unwrap_or(ANY_COUNTRY);
    format!("{KEY_PREFIX}:{place_name}:{country}:{}", names.join(PROVIDER_SEPARATOR))
}

/// Minimal key-value store protocol: string keys, opaque string values, TTL.
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Drops any open connection. The next call reconnects.
    async fn disconnect(&self) {}
}

/// Redis-backed store. The connection is opened on first use and reused.
pub struct RedisStore {
    client: redis::Client,
    conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Parses the URL only; no connection is attempted until first use.
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("invalid redis url '{redis_url}': {e}")))?;

        Ok(Self { client, conn: tokio::sync::Mutex::new(None) })
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        tracing::info!("cache connected");

        *guard = Some(conn.clone());
        Ok(conn)
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection_info", self.client.get_connection_info())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            tracing::info!("cache disconnected");
        }
    }
}

/// In-process store with per-entry expiry. Expired entries are dropped on
/// every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}

/// Typed cache port over a [`KeyValueStore`].
#[derive(Debug)]
pub struct AggregateCache<S> {
    store: S,
}

impl<S: KeyValueStore> AggregateCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A hit is returned with `from_cache` set.
    pub async fn get(&self, key: &str) -> Result<Option<AggregateResult>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            tracing::debug!(key, "cache miss");
            return Ok(None);
        };

        let mut result: AggregateResult = serde_json::from_str(&raw)?;
        result.from_cache = true;
        tracing::info!(key, "cache hit");
        Ok(Some(result))
    }

    /// Stores the aggregate exactly as given.
    pub async fn set(&self, key: &str, value: &AggregateResult, ttl: Duration) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.store.set_ex(key, &raw, ttl).await
    }

    pub async fn disconnect(&self) {
        self.store.disconnect().await;
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        (**self).set_ex(key, value, ttl).await
    }

    async fn disconnect(&self) {
        (**self).disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, ProviderReading};
    use std::collections::BTreeMap;

    fn sample_result() -> AggregateResult {
        let mut readings = BTreeMap::new();
        readings.insert(ProviderId::OpenWeather, ProviderReading::bare(ProviderId::OpenWeather, 18.5));

        AggregateResult {
            location: Location::new("Moscow", Some("ru")).unwrap(),
            providers_queried: vec![ProviderId::OpenWeather, ProviderId::Meteoblue],
            average_temperature: Some(18.5),
            min_temperature: Some(18.5),
            max_temperature: Some(18.5),
            readings_by_provider: readings,
            errors: vec!["meteoblue: request timed out after 10s".into()],
            from_cache: false,
            elapsed_seconds: 0.42,
        }
    }

    #[test]
    fn key_is_independent_of_provider_order() {
        let a = key_for("Moscow", Some("ru"), &[ProviderId::WeatherApi, ProviderId::Meteoblue]);
        let b = key_for("Moscow", Some("ru"), &[ProviderId::Meteoblue, ProviderId::WeatherApi]);
        assert_eq!(a, b);
        assert_eq!(a, "weather:Moscow:ru:meteoblue_weatherapi");
    }

    #[test]
    fn key_is_sensitive_to_country_code() {
        let any = key_for("Moscow", None, &[ProviderId::Meteoblue]);
        let ru = key_for("Moscow", Some("ru"), &[ProviderId::Meteoblue]);
        assert_ne!(any, ru);
        assert_eq!(any, "weather:Moscow:any:meteoblue");
    }

    #[test]
    fn validated_locations_never_share_a_key() {
        let providers = [ProviderId::Meteoblue];
        let key = |loc: &Location| key_for(&loc.place_name, loc.country_code.as_deref(), &providers);

        let bare = Location::new("Moscow", None).unwrap();
        let ru = Location::new("Moscow", Some("ru")).unwrap();
        let colon_place = Location::new("Moscow:ru", None).unwrap();

        assert_ne!(key(&bare), key(&ru));
        assert_ne!(key(&ru), key(&colon_place));
        assert_ne!(key(&bare), key(&colon_place));
        assert!(Location::new("Moscow", Some("any")).is_err());
        assert!(Location::new("Moscow", Some("ru:any")).is_err());
    }

    #[test]
    fn key_is_sensitive_to_provider_set() {
        let one = key_for("Paris", None, &[ProviderId::Meteoblue]);
        let two = key_for("Paris", None, &[ProviderId::Meteoblue, ProviderId::OpenWeather]);
        assert_ne!(one, two);
    }

    #[tokio::test]
    async fn round_trip_marks_value_as_cached() {
        let cache = AggregateCache::new(MemoryStore::new());
        let result = sample_result();

        cache.set("k", &result, Duration::from_secs(60)).await.unwrap();
        let cached = cache.get("k").await.unwrap().expect("entry should be present");

        assert!(cached.from_cache);
        assert_eq!(AggregateResult { from_cache: false, ..cached }, result);
    }

    #[tokio::test]
    async fn stored_payload_is_not_marked_cached() {
        let cache = AggregateCache::new(MemoryStore::new());
        cache.set("k", &sample_result(), Duration::from_secs(60)).await.unwrap();

        let raw = cache.store().get("k").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["from_cache"], false);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let cache = AggregateCache::new(MemoryStore::new());
        assert!(cache.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_millis(30)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn writes_evict_expired_entries() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.set_ex(&format!("stale-{i}"), "v", Duration::from_millis(10)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.set_ex("fresh", "v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.entries.lock().len(), 1);
        assert_eq!(store.get("fresh").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_serialization_error() {
        let cache = AggregateCache::new(MemoryStore::new());
        cache.store().set_ex("k", "not json", Duration::from_secs(60)).await.unwrap();

        let err = cache.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn invalid_redis_url_is_rejected() {
        let err = RedisStore::new("not a url").unwrap_err();
        assert!(matches!(err, CacheError::Connection(_)));
    }

    #[tokio::test]
    async fn unreachable_redis_surfaces_connection_error() {
        let store = RedisStore::new("redis://127.0.0.1:1/").unwrap();
        assert!(!store.is_connected().await);

        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Connection(_)));
        assert!(!store.is_connected().await);
    }
}
