use std::{path::PathBuf, process::ExitCode, time::Duration};

use ::tracing::{error, info, info_span};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use data_model::ArtifactId;
use service::Service;
use tokio_util::sync::CancellationToken;
use transfer_client::{ClientConfig, HttpChunkSource, TransferClient};

mod config;
mod coordinator;
mod gc;
mod http_objects;
mod metrics;
mod middleware;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the delivery server (the default).
    Serve,
    /// Download an artifact from a running server.
    Fetch {
        /// Base url of the server, e.g. http://localhost:8900
        #[arg(long)]
        url: String,
        #[arg(long)]
        artifact_id: String,
        /// Token returned when the artifact was requested.
        #[arg(long)]
        request_id: String,
        #[arg(long)]
        output: PathBuf,
        /// Seconds between polls while the artifact is being generated.
        #[arg(long, default_value_t = 2.0)]
        poll_interval: f64,
        /// Consecutive store faults tolerated before giving up.
        #[arg(long, default_value_t = 5)]
        store_retry_budget: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => match config::ServerConfig::from_path(&path.display().to_string()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error loading config {}: {:?}", path.display(), err);
                return ExitCode::FAILURE;
            }
        },
        None => config::ServerConfig::default(),
    };

    let tracing_provider = match setup_tracing(&config) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("error setting up tracing: {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    let meter_provider = metrics::init_provider(&config)
        .inspect_err(|e| error!("error setting up metrics, continuing without: {:?}", e))
        .ok()
        .flatten();

    let root_span = info_span!(
        "wave-delivery",
        env = config.env,
        "wave-delivery-instance" = config.instance_id()
    );
    let _guard = root_span.enter();

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Fetch {
            url,
            artifact_id,
            request_id,
            output,
            poll_interval,
            store_retry_budget,
        } => {
            let client_config = ClientConfig {
                poll_interval: Duration::try_from_secs_f64(poll_interval)
                    .unwrap_or(Duration::from_secs(2)),
                store_retry_budget,
            };
            fetch(&url, &artifact_id, &request_id, &output, client_config).await
        }
    };

    // export traces and metrics before shutdown
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
    if let Some(meter_provider) = meter_provider {
        if let Err(err) = meter_provider.shutdown() {
            error!("Error shutting down meter provider: {:?}", err);
        }
    }

    code
}

async fn serve(config: config::ServerConfig) -> ExitCode {
    let mut service = match Service::new(config).await {
        Ok(service) => service,
        Err(err) => {
            error!("Error creating service: {:?}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = service.start().await {
        error!("Error starting service: {:?}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn fetch(
    url: &str,
    artifact_id: &str,
    request_id: &str,
    output: &PathBuf,
    client_config: ClientConfig,
) -> ExitCode {
    match download_to_file(url, artifact_id, request_id, output, client_config).await {
        Ok(size) => {
            info!(size, output = %output.display(), "artifact saved");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn download_to_file(
    url: &str,
    artifact_id: &str,
    request_id: &str,
    output: &PathBuf,
    client_config: ClientConfig,
) -> Result<usize> {
    let source = HttpChunkSource::new(url)?;
    let client = TransferClient::new(source, client_config);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let artifact = client
        .download(&ArtifactId::from(artifact_id), request_id, &cancel)
        .await?;
    tokio::fs::write(output, &artifact)
        .await
        .with_context(|| format!("error writing {}", output.display()))?;
    Ok(artifact.len())
}
