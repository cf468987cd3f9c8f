use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ValidationError, provider::ProviderId};

pub const MIN_PLACE_NAME_LEN: usize = 2;

/// Where the caller wants the weather for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub place_name: String,
    pub country_code: Option<String>,
}

impl Location {
    pub fn new(place_name: &str, country_code: Option<&str>) -> Result<Self, ValidationError> {
        let place_name = place_name.trim();
        if place_name.chars().count() < MIN_PLACE_NAME_LEN {
            return Err(ValidationError::PlaceNameTooShort {
                min: MIN_PLACE_NAME_LEN,
                got: place_name.to_string(),
            });
        }

        let country_code = match country_code.map(str::trim) {
            None | Some("") => None,
            Some(cc) if cc.len() == 2 && cc.bytes().all(|b| b.is_ascii_alphabetic()) => {
                Some(cc.to_ascii_lowercase())
            }
            Some(cc) => return Err(ValidationError::InvalidCountryCode(cc.to_string())),
        };

        Ok(Self { place_name: place_name.to_string(), country_code })
    }

    /// `"<place>,<cc>"` when a country code is present, the bare place otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.country_code {
            Some(cc) => format!("{},{}", self.place_name, cc),
            None => self.place_name.clone(),
        }
    }
}

/// A validated request: a location plus the effective, de-duplicated set of
/// providers to query, in the order the caller presented them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub location: Location,
    pub providers: Vec<ProviderId>,
}

/// One provider's normalized current-weather reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReading {
    pub provider: ProviderId,
    /// Degrees Celsius.
    pub temperature: f64,
    pub feels_like: Option<f64>,
    /// Percent.
    pub humidity: Option<u8>,
    /// Hectopascal.
    pub pressure: Option<f64>,
    /// Metres per second.
    pub wind_speed: Option<f64>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ProviderReading {
    /// A reading carrying only the required fields, observed now.
    pub fn bare(provider: ProviderId, temperature: f64) -> Self {
        Self {
            provider,
            temperature,
            feels_like: None,
            humidity: None,
            pressure: None,
            wind_speed: None,
            description: None,
            icon: None,
            observed_at: Utc::now(),
        }
    }
}

/// The aggregate of one fan-out.
///
/// Every provider in `providers_queried` is either a key of
/// `readings_by_provider` or the source of exactly one `errors` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub location: Location,
    pub providers_queried: Vec<ProviderId>,
    pub average_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub readings_by_provider: BTreeMap<ProviderId, ProviderReading>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub from_cache: bool,
    pub elapsed_seconds: f64,
}

/// Summary statistics over successful temperatures. All fields are `None`
/// when there is nothing to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TemperatureStats {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl TemperatureStats {
    pub fn from_temperatures<I>(temps: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for t in temps {
            count += 1;
            sum += t;
            min = min.min(t);
            max = max.max(t);
        }

        if count == 0 {
            return Self::default();
        }

        Self { average: Some(sum / count as f64), min: Some(min), max: Some(max) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_rejects_short_place_names() {
        let err = Location::new(" a ", None).unwrap_err();
        assert!(matches!(err, ValidationError::PlaceNameTooShort { min: 2, .. }));
    }

    #[test]
    fn location_normalizes_country_code() {
        let loc = Location::new("Moscow", Some(" RU ")).unwrap();
        assert_eq!(loc.country_code.as_deref(), Some("ru"));
        assert_eq!(loc.qualified_name(), "Moscow,ru");

        let loc = Location::new("Moscow", Some("")).unwrap();
        assert_eq!(loc.country_code, None);
        assert_eq!(loc.qualified_name(), "Moscow");
    }

    #[test]
    fn location_rejects_malformed_country_codes() {
        for cc in ["any", "r:u", "ru:x", "RUS", "r", "1a"] {
            let err = Location::new("Moscow", Some(cc)).unwrap_err();
            assert_eq!(err, ValidationError::InvalidCountryCode(cc.to_string()), "accepted {cc:?}");
        }
    }

    #[test]
    fn stats_are_absent_without_readings() {
        let stats = TemperatureStats::from_temperatures(std::iter::empty());
        assert_eq!(stats, TemperatureStats { average: None, min: None, max: None });
    }

    #[test]
    fn stats_over_single_reading_collapse_to_it() {
        let stats = TemperatureStats::from_temperatures([20.0]);
        assert_eq!(stats.average, Some(20.0));
        assert_eq!(stats.min, Some(20.0));
        assert_eq!(stats.max, Some(20.0));
    }

    #[test]
    fn stats_handle_negative_and_zero_values() {
        let stats = TemperatureStats::from_temperatures([-4.0, 0.0, 7.0]);
        assert_eq!(stats.average, Some(1.0));
        assert_eq!(stats.min, Some(-4.0));
        assert_eq!(stats.max, Some(7.0));
    }

    #[test]
    fn aggregate_serializes_provider_keys_as_names() {
        let mut readings = BTreeMap::new();
        readings.insert(ProviderId::Meteoblue, ProviderReading::bare(ProviderId::Meteoblue, 3.5));

        let result = AggregateResult {
            location: Location::new("Oslo", Some("no")).unwrap(),
            providers_queried: vec![ProviderId::Meteoblue],
            average_temperature: Some(3.5),
            min_temperature: Some(3.5),
            max_temperature: Some(3.5),
            readings_by_provider: readings,
            errors: vec![],
            from_cache: false,
            elapsed_seconds: 0.25,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["providers_queried"][0], "meteoblue");
        assert_eq!(json["readings_by_provider"]["meteoblue"]["temperature"], 3.5);

        let back: AggregateResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
