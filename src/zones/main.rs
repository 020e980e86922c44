//! No-swim zone pipeline.
//!
//! Fetches the facility list, rebuilds the zone collection when it changed,
//! and publishes the GeoJSON and KML artifacts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use noswim::config::Config;
use noswim::discord::DiscordWebhook;
use noswim::error::ZonesError;
use noswim::pipeline::{SecondaryLeg, ZonePipeline};
use noswim::publish::{FsStore, ObjectStore};
use noswim::source::{FacilitySource, FileFacilitySource, HttpFacilitySource};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "zones")]
#[command(about = "Build and publish no-swim zones around wastewater discharge points")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for both object stores, overriding the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once
    Run {
        /// Read facilities from a local JSON file instead of the upstream API
        #[arg(long)]
        source_file: Option<PathBuf>,
    },
    /// Re-render the KML from the stored GeoJSON without recomputing
    SyncKml,
}

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    let args = Args::parse();

    match execute(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{} ({})", e, e.label());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn execute(args: Args) -> Result<ExitCode, ZonesError> {
    let config = load_config(&args)?;

    match args.command {
        Command::Run { source_file } => {
            let source = build_source(&config, source_file)?;
            let pipeline = build_pipeline(&config, Some(source));

            let discord = config
                .notify
                .discord_webhook
                .as_ref()
                .map(|url| DiscordWebhook::new(url.clone()));

            let outcome = pipeline.run().await;
            if let Some(dw) = &discord {
                dw.notify_run(&outcome).await;
            }

            let report = outcome?;
            info!("Run finished: {:?}", report.status);
            print_json(&report);
            Ok(ExitCode::SUCCESS)
        }
        Command::SyncKml => {
            let pipeline = build_pipeline(&config, None);

            let leg = pipeline.sync_secondary().await?;
            print_json(&leg);
            Ok(match leg {
                SecondaryLeg::Published { .. } => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            })
        }
    }
}

fn load_config(args: &Args) -> Result<Config, ZonesError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Config::load_from_file(path)?
        }
        None => Config::default(),
    };
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    config.validate()?;
    Ok(config)
}

fn build_source(
    config: &Config,
    source_file: Option<PathBuf>,
) -> Result<Arc<dyn FacilitySource>, ZonesError> {
    let source: Arc<dyn FacilitySource> = match source_file {
        Some(path) => Arc::new(FileFacilitySource::new(path)),
        None => Arc::new(HttpFacilitySource::new(
            config.source.url.clone(),
            config.source.timeout(),
        )?),
    };
    Ok(source)
}

/// Without a source the pipeline can only re-publish stored artifacts.
fn build_pipeline(config: &Config, source: Option<Arc<dyn FacilitySource>>) -> ZonePipeline {
    info!("Primary store: {}", config.storage.root.display());
    let primary: Arc<dyn ObjectStore> = Arc::new(FsStore::new(&config.storage.root));
    let pipeline = match source {
        Some(source) => ZonePipeline::new(config.pipeline(), source, primary),
        None => ZonePipeline::without_source(config.pipeline(), primary),
    };

    if config.secondary.enabled {
        info!("Secondary store: {}", config.secondary.root.display());
        pipeline.with_secondary(Arc::new(FsStore::new(&config.secondary.root)))
    } else {
        pipeline
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize report: {}", e),
    }
}
