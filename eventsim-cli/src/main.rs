//! eventsim CLI - Command-line tools for capturing and replaying SSE streams

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventsim_core::config::{SimulatorConfig, StorageMode};
use eventsim_core::dispatcher::GENERATOR_SUFFIX;
use eventsim_core::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "eventsim")]
#[command(about = "Server-sent event simulator CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to eventsim.toml and EVENTSIM_* variables)
    #[arg(short, long, global = true, env = "EVENTSIM_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Directory of the stored event log
    #[arg(long, global = true, env = "EVENTSIM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a live stream into the stored event log
    Capture {
        /// Source stream (overrides capture_url)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Consume a stream once and report how it ended
    Test {
        /// Stream URL
        url: String,
        /// The stream is known to end with a CLOSE sentinel
        #[arg(long)]
        close_event_supported: bool,
    },
    /// Replay the stored event log through an in-process interception context
    Simulate {
        /// Endpoint the playback is registered under
        #[arg(short, long)]
        endpoint: Option<String>,
        /// Delay between frames in milliseconds
        #[arg(long)]
        cadence_ms: Option<u64>,
        /// Append a CLOSE sentinel after the stored events
        #[arg(long)]
        close_event: bool,
        /// Consume the live generator instead of the stored events
        #[arg(long)]
        generator: bool,
    },
    /// Stored event log commands
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },
    /// Version information
    Version,
}

#[derive(Subcommand)]
enum EventsCommands {
    /// Print stored events, oldest first
    List,
    /// Remove all stored events
    Clear,
    /// Print the number of stored events
    Count,
}

fn load_config(cli: &Cli) -> Result<SimulatorConfig> {
    let mut config = match &cli.config {
        Some(path) => SimulatorConfig::from_file(path)?,
        None => SimulatorConfig::load()?,
    };
    // A command-line run only makes sense with a log that outlives it
    if let Some(data_dir) = &cli.data_dir {
        config.storage.mode = StorageMode::File {
            data_dir: data_dir.clone(),
        };
    } else if config.storage.mode == StorageMode::Memory {
        config.storage.mode = StorageMode::default_file();
    }
    Ok(config)
}

fn print_status(update: &StatusUpdate) {
    match &update.last_event {
        Some(event) => println!(
            "[{}] {} ({}) {}",
            update.status, update.message, update.event_count, event
        ),
        None => println!("[{}] {} ({})", update.status, update.message, update.event_count),
    }
}

async fn capture(config: SimulatorConfig, url: Option<String>) -> Result<()> {
    let mut config = config;
    if url.is_some() {
        config.capture_url = url;
    }
    let simulator = EventSimulator::from_config(config)?;
    let mut handle = simulator.start_capture().await?;

    loop {
        tokio::select! {
            update = handle.next_status() => match update {
                Some(update) => print_status(&update),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                simulator.stop_capture().await;
            }
        }
    }

    let outcome = handle.wait().await?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

async fn consume(mut handle: ConsumptionHandle) -> Result<()> {
    while let Some(update) = handle.next_status().await {
        print_status(&update);
    }
    let outcome = handle.wait().await?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

async fn simulate(
    mut config: SimulatorConfig,
    endpoint: Option<String>,
    cadence_ms: Option<u64>,
    close_event: bool,
    generator: bool,
) -> Result<()> {
    if let Some(endpoint) = endpoint {
        config.event_source_url = endpoint;
    }
    if let Some(ms) = cadence_ms {
        config.playback.cadence = Duration::from_millis(ms);
    }
    if close_event {
        config.close_event_supported = true;
    }

    let (simulator, mut worker) = EventSimulator::with_interception(config)?;
    let report = simulator
        .register(&worker)
        .await
        .context("interception context did not become ready")?;
    tracing::info!(endpoint = %report.endpoint_id, "Registered");

    let url = if generator {
        format!("/{}", GENERATOR_SUFFIX)
    } else {
        let count = simulator.load_events_from_storage().await?;
        if count == 0 {
            tracing::warn!("Stored event log is empty, the stream will only close");
        }
        report.endpoint_id
    };

    let result = consume(simulator.test(&url).await?).await;
    worker.shutdown().await?;
    result
}

async fn events(config: SimulatorConfig, command: EventsCommands) -> Result<()> {
    let simulator = EventSimulator::from_config(config)?;
    let log = simulator.event_log();
    match command {
        EventsCommands::List => {
            for event in log.load().await? {
                println!("{}", event);
            }
        }
        EventsCommands::Clear => {
            simulator.clear_events_from_storage().await?;
            println!("Cleared stored events");
        }
        EventsCommands::Count => {
            println!("{}", log.len().await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("eventsim {}", env!("CARGO_PKG_VERSION"));
        println!("eventsim-core {}", eventsim_core::VERSION);
        return Ok(());
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Capture { url } => capture(config, url).await,
        Commands::Test {
            url,
            close_event_supported,
        } => {
            let mut config = config;
            config.close_event_supported |= close_event_supported;
            let simulator = EventSimulator::from_config(config)?;
            consume(simulator.test(&url).await?).await
        }
        Commands::Simulate {
            endpoint,
            cadence_ms,
            close_event,
            generator,
        } => simulate(config, endpoint, cadence_ms, close_event, generator).await,
        Commands::Events { command } => events(config, command).await,
        Commands::Version => Ok(()),
    }
}
