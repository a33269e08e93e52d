//! `photo-weather` command line front end.
//!
//! | Variable                 | Description                           |
//! |--------------------------|---------------------------------------|
//! | `PHOTO_WEATHER_API_KEY`  | Weather service application key      |
//! | `PHOTO_WEATHER_BASE_URL` | Weather service root                  |
//! | `PHOTO_WEATHER_DB`       | History database file                 |
//! | `PHOTO_WEATHER_GALLERY`  | Gallery directory                     |
//! | `RUST_LOG`               | Log filter, default `photo_weather=info` |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_weather::photo::{FileCamera, NoShare, ShareTarget};
use photo_weather::weather::{FailureKind, WeatherError, WeatherSnapshot};
use photo_weather::{AppConfig, PhotoWeather, PipelineError};

#[derive(Debug, Parser)]
#[command(name = "photo-weather", version, about = "Stamp the current weather on your photos")]
struct Cli {
    /// Config file (default: <config dir>/photo-weather/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the current weather for a city
    Weather { city: String },

    /// Annotate a photo with the current weather and store it
    Capture {
        city: String,
        /// Image to import as the captured photo; without it the capture is cancelled
        #[arg(long = "from")]
        from: Option<PathBuf>,
        /// Don't offer the result to the configured share command
        #[arg(long)]
        no_share: bool,
    },

    /// Browse and maintain the photo history
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// List photos, newest first
    List,
    /// Delete one record by id
    Delete { id: i64 },
    /// Delete every record
    Clear,
    /// Drop records whose image is gone from the gallery
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_weather=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let app = PhotoWeather::open(&config)
        .await
        .context("Failed to open photo storage")?;

    let result = run(&app, cli.command).await;
    app.shutdown().await.context("Failed to close photo history")?;
    result
}

async fn run(app: &PhotoWeather, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Weather { city } => {
            let snapshot = fetch_weather(app, &city).await?;
            print_weather(&snapshot);
        }

        Command::Capture { city, from, no_share } => {
            let snapshot = fetch_weather(app, &city).await?;
            print_weather(&snapshot);

            let share: Arc<dyn ShareTarget> = if no_share {
                Arc::new(NoShare)
            } else {
                app.share_target()
            };
            let pipeline = app.pipeline(Arc::new(FileCamera::new(from)), share);

            match pipeline.run().await {
                Ok(report) => {
                    println!("Saved {}", report.record.url);
                    println!("  overlay color {}", report.overlay);
                    if let Some(err) = report.share_error.filter(|_| !no_share) {
                        println!("  not shared: {err}");
                    }
                }
                Err(PipelineError::Cancelled) => println!("Capture cancelled, nothing saved."),
                Err(err) => return Err(err).context("Capture failed"),
            }
        }

        Command::History { action } => history(app, action).await?,
    }
    Ok(())
}

async fn fetch_weather(app: &PhotoWeather, city: &str) -> anyhow::Result<Arc<WeatherSnapshot>> {
    match app.weather().refresh(city).await {
        Ok(Some(snapshot)) => Ok(snapshot),
        Ok(None) => bail!("Please enter a city name"),
        Err(err @ WeatherError::MissingApiKey) => {
            Err(err).context("Set PHOTO_WEATHER_API_KEY or [weather] api_key")
        }
        Err(err) => match FailureKind::from(&err) {
            FailureKind::NotFound => bail!("City not found: {}", city.trim()),
            FailureKind::Network => Err(err).context("Could not reach the weather service"),
        },
    }
}

fn print_weather(weather: &WeatherSnapshot) {
    println!("{}", weather.city());
    if weather.has_distinct_description() {
        println!("  {} ({})", weather.main(), weather.description());
    } else {
        println!("  {}", weather.main());
    }
    println!("  temperature  {} °C", weather.temperature_label());
    println!("  feels like   {:.2} °C", weather.feels_like());
    println!("  min / max    {:.2} / {:.2} °C", weather.min(), weather.max());
    println!("  humidity     {}%", weather.humidity());
    println!("  clouds       {}%", weather.cloudiness());
    println!("  wind         {} m/s", weather.wind_speed());
}

async fn history(app: &PhotoWeather, action: HistoryCommand) -> anyhow::Result<()> {
    let history = app.history();
    match action {
        HistoryCommand::List => {
            let records = history.list_all().await.context("Failed to list history")?;
            if records.is_empty() {
                println!("No photos yet.");
            }
            for record in records {
                let id = record.id.map(|id| id.to_string()).unwrap_or_default();
                println!("{id:>5}  {}  {}", record.time_stamp, record.url);
            }
        }
        HistoryCommand::Delete { id } => {
            if history.delete_by_id(id).await.context("Failed to delete record")? {
                println!("Deleted record {id}.");
            } else {
                println!("No record {id}.");
            }
        }
        HistoryCommand::Clear => {
            let removed = history.delete_all().await.context("Failed to clear history")?;
            println!("Removed {removed} records.");
        }
        HistoryCommand::Reconcile => {
            let removed = history
                .reconcile(app.gallery().as_ref())
                .await
                .context("Failed to reconcile history")?;
            println!("Dropped {removed} records with missing images.");
        }
    }
    Ok(())
}
