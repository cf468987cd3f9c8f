use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use weather_agg_core::{Config, ProviderId, ServiceError, WeatherQuery, WeatherService};

use crate::output;

/// Exit status for requests rejected as invalid.
const EXIT_BAD_REQUEST: i32 = 2;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-agg", version, about = "Aggregated weather from several providers")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "meteoblue", "openweather" or "weatherapi".
        provider: String,
    },

    /// List the providers that can be queried.
    Providers,

    /// Show aggregated weather for a place.
    Show {
        /// Place name, at least two characters.
        place: String,

        /// Optional country code, e.g. "ru" or "us".
        #[arg(long)]
        country: Option<String>,

        /// Restrict the query to these providers; repeatable. Defaults to all active ones.
        #[arg(long = "provider", short = 'p')]
        providers: Vec<String>,

        /// Read and write the shared cache.
        #[arg(long)]
        use_cache: bool,

        /// Ignore any cached value but still refresh the cache.
        #[arg(long)]
        force_refresh: bool,

        /// Print the aggregate as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Providers => {
                let service = WeatherService::from_config(&Config::load()?)?;
                for name in service.list_available_providers() {
                    println!("{name}");
                }
                Ok(())
            }
            Command::Show { place, country, providers, use_cache, force_refresh, json } => {
                let service = WeatherService::from_config(&Config::load()?)?;
                let query = WeatherQuery {
                    place_name: place,
                    country_code: country,
                    providers: (!providers.is_empty()).then_some(providers),
                    use_cache,
                    force_refresh,
                };

                let outcome = service.get_weather(&query).await;
                service.shutdown().await;

                match outcome {
                    Ok(result) if json => {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                        Ok(())
                    }
                    Ok(result) => {
                        print!("{}", output::render(&result));
                        Ok(())
                    }
                    Err(err @ ServiceError::Validation(_)) => {
                        eprintln!("error: {err}");
                        std::process::exit(EXIT_BAD_REQUEST);
                    }
                    Err(err) => Err(err).context("Failed to fetch weather"),
                }
            }
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id: ProviderId = provider.parse()?;
    let mut config = Config::load()?;

    let api_key = inquire::Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .with_display_mode(inquire::PasswordDisplayMode::Masked)
        .prompt()
        .context("Failed to read API key")?;

    config.upsert_provider_api_key(id, api_key.trim().to_string());
    config.save()?;

    println!("Saved credentials for {id} to {}", Config::config_file_path()?.display());
    Ok(())
}
