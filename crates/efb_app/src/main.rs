//! EFB headless session
//!
//! Starts the simulation responder with demo data, runs a few requests
//! through the tablet UI and prints the resulting screen.

use anyhow::{Context, Result};
use clap::Parser;
use efb_app::{AppConfig, EfbApp, Page};
use efb_rpc::{Responder, StaticProvider};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "efb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Headless EFB tablet session", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Airport to fetch weather and runways for
    #[arg(long, default_value = "KJFK")]
    icao: String,

    /// Pilot id whose flight plan is imported
    #[arg(long)]
    pilot: Option<String>,

    /// Failure to activate
    #[arg(long)]
    failure: Option<String>,

    /// Notification ticks to run before printing the screen
    #[arg(long, default_value = "10")]
    ticks: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cli, config))
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let app = EfbApp::new(&config)?;
    let _responder = Responder::start(app.bus(), Rc::new(StaticProvider::demo()));
    app.client().initialized().await;
    info!("simulation ready");

    // Each failure is already reported as a notification.
    app.show_page(Page::Weather);
    if let Err(err) = app.fetch_metar(&cli.icao).await {
        warn!("{err:#}");
    }
    if let Err(err) = app.fetch_taf(&cli.icao).await {
        warn!("{err:#}");
    }
    if let Err(err) = app.fetch_runways(&cli.icao).await {
        warn!("{err:#}");
    }
    if let Some(pilot) = &cli.pilot {
        if let Err(err) = app.import_flight_plan(pilot).await {
            warn!("{err:#}");
        }
    }
    if let Some(failure) = &cli.failure {
        if let Err(err) = app.set_failure(failure, true).await {
            warn!("{err:#}");
        }
    }

    app.run_ticker(Some(cli.ticks)).await;
    println!("{}", app.render());
    Ok(())
}
