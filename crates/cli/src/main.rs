use crate::{
    commands::{Commands, OffsetsCommand, RunArgs},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::file::csv::settings::CsvSettings;
use engine_config::settings::PipelineSettings;
use engine_core::{event_bus::EventBus, offsets::OffsetStore};
use engine_runtime::{
    factory::{create_csv_pipeline, open_offset_store},
    runner,
};
use model::events::NoMoreData;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "ingest", version = "0.1.0", about = "Partition-aware table ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());

    let code = match execute(cli.command, &shutdown).await {
        Ok(()) if shutdown.is_shutdown_requested() => ExitCode::ShutdownRequested,
        Ok(()) => ExitCode::Success,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn execute(command: Commands, shutdown: &ShutdownCoordinator) -> Result<(), CliError> {
    match command {
        Commands::Run(args) => run_pipeline(args, shutdown).await,
        Commands::Offsets { command } => match command {
            OffsetsCommand::Show { config, json } => show_offsets(&config, json).await,
            OffsetsCommand::Reset { config } => reset_offsets(&config).await,
        },
    }
}

async fn run_pipeline(args: RunArgs, shutdown: &ShutdownCoordinator) -> Result<(), CliError> {
    let mut settings = PipelineSettings::from_file(&args.config).await?;
    if let Some(output) = args.output {
        settings.target.path = Some(output);
    }
    settings.preview |= args.preview;
    let settings = settings.validated()?;

    let store = offset_store(&settings)?;
    info!(
        pipeline = %settings.name,
        input = %args.input.display(),
        offsets = %store.location(),
        "Running pipeline"
    );

    let csv = CsvSettings::new(args.delimiter, !args.no_headers);
    let pipeline = create_csv_pipeline(settings, args.input, csv)?;

    let bus = EventBus::new();
    let cancel = shutdown.cancel_token();
    shutdown.register_handlers();

    let (_subscription, mut drained) = bus.listen::<NoMoreData>(16).await;
    let follow = args.follow;
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(event) = drained.recv().await {
                info!(
                    cycle = event.cycle,
                    records = event.record_count,
                    "Every partition is drained"
                );
                if !follow {
                    cancel.cancel();
                    break;
                }
            }
        })
    };

    let result = runner::run(pipeline, store, bus, cancel.clone()).await;
    watcher.abort();
    // lets the signal task exit
    cancel.cancel();
    let report = result?;

    match args.report {
        Some(path) => output::write_report(&report, &path).await,
        None => output::print_report(&report),
    }
}

async fn show_offsets(config: &Path, as_json: bool) -> Result<(), CliError> {
    let settings = PipelineSettings::from_file(config).await?;
    let store = offset_store(&settings)?;
    let offsets = store.load().await?;

    if as_json {
        let json = serde_json::to_string_pretty(&offsets)?;
        println!("{json}");
    } else {
        output::print_offsets_table(&settings.name, &store.location(), offsets.as_ref());
    }
    Ok(())
}

async fn reset_offsets(config: &Path) -> Result<(), CliError> {
    let settings = PipelineSettings::from_file(config).await?;
    let store = offset_store(&settings)?;
    store.reset().await?;
    info!(pipeline = %settings.name, location = %store.location(), "Offsets reset");
    Ok(())
}

fn offset_store(settings: &PipelineSettings) -> Result<Arc<dyn OffsetStore>, CliError> {
    let default_dir = default_offsets_dir()?;
    if settings.offsets.path.is_none() {
        std::fs::create_dir_all(&default_dir)?;
    }
    Ok(open_offset_store(
        &settings.offsets,
        &settings.name,
        &default_dir,
    )?)
}

fn default_offsets_dir() -> Result<PathBuf, CliError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(".ingest/offsets"))
}
