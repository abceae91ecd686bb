use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use latentsync_worker::config::WorkerConfig;
use latentsync_worker::models::JobResponse;
use latentsync_worker::services::ModelProvisioner;
use latentsync_worker::start_worker;
use latentsync_worker::utils::logger::init_logger;

/// LatentSync-1.5 lip-sync worker
#[derive(Parser)]
#[command(name = "latentsync-worker", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH", env = "LATENTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging for the worker
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download model weights and link auxiliary models, then exit
    Provision,

    /// Process a single event and print the response
    Run {
        /// Event JSON, e.g. '{"input": {"video_url": "...", "audio_url": "..."}}'
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File containing the event JSON
        #[arg(long, value_name = "PATH")]
        input_file: Option<PathBuf>,
    },

    /// Read newline-delimited events from stdin, one JSON response per line on stdout
    Serve,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = WorkerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Provision => {
            let provisioner = ModelProvisioner::new(&config)?;
            let ready = provisioner.ensure_ready().await?;
            info!(
                "Models ready in {} ({} auxiliary links)",
                ready.cache_dir.display(),
                ready.auxiliary_links.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { input, input_file } => {
            let raw = match (input, input_file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => {
                    let mut text = String::new();
                    tokio::io::stdin().read_to_string(&mut text).await?;
                    text
                }
            };

            let handler = start_worker(&config).await?;
            let response = match serde_json::from_str::<Value>(&raw) {
                Ok(event) => handler.handle_event(&event).await,
                Err(e) => invalid_event(e),
            };

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(if response.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Serve => {
            let handler = start_worker(&config).await?;
            info!("Worker ready, waiting for events on stdin");

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<Value>(&line) {
                    Ok(event) => handler.handle_event(&event).await,
                    Err(e) => invalid_event(e),
                };
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }

            info!("stdin closed, shutting down");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn invalid_event(e: serde_json::Error) -> JobResponse {
    error!("Invalid event JSON: {}", e);
    JobResponse::Failed {
        error: "Invalid event JSON".to_string(),
        details: Some(e.to_string()),
    }
}
