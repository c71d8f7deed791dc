use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idmatch_core::{extract_reference, Frame};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod recording;
mod replay;

use config::Config;
use recording::Recording;

#[derive(Parser)]
#[command(
    name = "idmatch",
    version,
    about = "Identity document face match with head-pose liveness challenges"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full verification session from recorded detections
    Replay {
        /// Recording JSON (document + per-frame detections)
        recording: PathBuf,
        /// Document image to load instead of a blank canvas
        #[arg(long)]
        document: Option<PathBuf>,
        /// Pace frame delivery to this rate (default: as fast as possible)
        #[arg(long)]
        fps: Option<f32>,
        /// Write an annotated PNG at every challenge boundary into this directory
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },
    /// Extract the reference face from a recording's document entry
    Extract {
        recording: PathBuf,
        #[arg(long)]
        document: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    if let Some(path) = &config.source {
        tracing::debug!(path = %path.display(), "configuration loaded");
    }

    match cli.command {
        Command::Replay {
            recording,
            document,
            fps,
            snapshots,
        } => {
            let args = replay::ReplayArgs {
                recording,
                document,
                fps,
                snapshots,
            };
            replay::run(&config.verification, args).await
        }
        Command::Extract {
            recording,
            document,
        } => {
            run_extract(&recording, document)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            let text = toml::to_string_pretty(&config.verification)
                .context("failed to serialize configuration")?;
            print!("{text}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_extract(path: &std::path::Path, document: Option<PathBuf>) -> Result<()> {
    let recording = Recording::load(path)?;
    let frame = match document {
        Some(image) => Frame::open(&image, 0)
            .with_context(|| format!("failed to load document image {}", image.display()))?,
        None => recording.document_frame(),
    };
    let mut provider = recording.provider();
    let reference = extract_reference(&mut provider, &frame)?;
    println!("{}", serde_json::to_string_pretty(&reference)?);
    Ok(())
}
