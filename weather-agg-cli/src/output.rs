use std::fmt::Write;

use weather_agg_core::AggregateResult;

/// Human-readable summary of an aggregate.
pub fn render(result: &AggregateResult) -> String {
    let mut out = String::new();

    let place = result.location.qualified_name();
    let source = if result.from_cache { " (cached)" } else { "" };
    let _ = writeln!(out, "Weather for {place}{source}");

    match (result.average_temperature, result.min_temperature, result.max_temperature) {
        (Some(avg), Some(min), Some(max)) => {
            let _ = writeln!(out, "  average {avg:.1}°C  (min {min:.1}°C, max {max:.1}°C)");
        }
        _ => {
            let _ = writeln!(out, "  no provider returned data");
        }
    }

    for (provider, reading) in &result.readings_by_provider {
        let _ = write!(out, "  {provider:<12} {:>6.1}°C", reading.temperature);
        if let Some(desc) = &reading.description {
            let _ = write!(out, "  {desc}");
        }
        if let Some(wind) = reading.wind_speed {
            let _ = write!(out, "  wind {wind:.1} m/s");
        }
        out.push('\n');
    }

    for err in &result.errors {
        let _ = writeln!(out, "  ! {err}");
    }

    let _ = writeln!(out, "  ({:.2}s)", result.elapsed_seconds);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use weather_agg_core::{Location, ProviderId, ProviderReading};

    fn result(readings: Vec<ProviderReading>, errors: Vec<String>) -> AggregateResult {
        let temps: Vec<f64> = readings.iter().map(|r| r.temperature).collect();
        let avg = (!temps.is_empty()).then(|| temps.iter().sum::<f64>() / temps.len() as f64);

        AggregateResult {
            location: Location::new("Moscow", Some("ru")).unwrap(),
            providers_queried: ProviderId::all().to_vec(),
            average_temperature: avg,
            min_temperature: temps.iter().copied().reduce(f64::min),
            max_temperature: temps.iter().copied().reduce(f64::max),
            readings_by_provider: readings.into_iter().map(|r| (r.provider, r)).collect::<BTreeMap<_, _>>(),
            errors,
            from_cache: false,
            elapsed_seconds: 0.5,
        }
    }

    #[test]
    fn renders_statistics_and_errors() {
        let text = render(&result(
            vec![
                ProviderReading::bare(ProviderId::OpenWeather, 2.0),
                ProviderReading::bare(ProviderId::WeatherApi, 4.0),
            ],
            vec!["meteoblue: request timed out after 10s".into()],
        ));

        assert!(text.starts_with("Weather for Moscow,ru\n"));
        assert!(text.contains("average 3.0°C  (min 2.0°C, max 4.0°C)"));
        assert!(text.contains("openweather"));
        assert!(text.contains("! meteoblue: request timed out after 10s"));
    }

    #[test]
    fn renders_absent_statistics() {
        let text = render(&result(vec![], vec!["weatherapi: transport error: dns".into()]));
        assert!(text.contains("no provider returned data"));
        assert!(!text.contains("average"));
    }

    #[test]
    fn marks_cached_results() {
        let mut r = result(vec![ProviderReading::bare(ProviderId::Meteoblue, 1.0)], vec![]);
        r.from_cache = true;
        assert!(render(&r).starts_with("Weather for Moscow,ru (cached)"));
    }
}
