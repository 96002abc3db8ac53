//! Lapse CLI: command-line interface for adaptive time-lapse recording.
//!
//! Usage:
//!   lapse record [OPTIONS]    Record a synthetic time-lapse
//!   lapse inspect <FILE>      Show an artifact's header and length
//!   lapse check [OPTIONS]     Check whether an encoder configuration is supported

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lapse",
    about = "Adaptive time-lapse recording with a bounded output length",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a time-lapse from a synthetic frame source
    Record {
        /// Output file (defaults to timelapse.lapse in the configured output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of frames to capture
        #[arg(long, conflicts_with = "seconds")]
        frames: Option<u64>,

        /// Capture length in seconds
        #[arg(long)]
        seconds: Option<f64>,

        /// Source frame rate (non-positive values fall back to the configured rate)
        #[arg(long, allow_negative_numbers = true)]
        fps: Option<f64>,

        /// Ceiling on the output length (seconds)
        #[arg(long)]
        max_duration: Option<u32>,

        /// Starting speed factor
        #[arg(long)]
        initial_speed: Option<u32>,

        /// Frame width
        #[arg(long, default_value = "320")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "180")]
        height: u32,

        /// Pace frames at the capture rate instead of as fast as the tick allows
        #[arg(long)]
        realtime: bool,

        /// Directory for in-flight artifacts
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },

    /// Show an artifact's header, frame count and duration
    Inspect {
        /// Path to the artifact
        path: PathBuf,

        /// Print the header as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether the backend supports an encoder configuration
    Check {
        /// Codec name
        #[arg(long)]
        codec: Option<String>,

        /// Frame width
        #[arg(long)]
        width: Option<u32>,

        /// Frame height
        #[arg(long)]
        height: Option<u32>,

        /// Frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Write the checked configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    lapse_common::logging::init_logging(&lapse_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: cli.json_logs,
        file: None,
    });

    match cli.command {
        Commands::Record {
            output,
            frames,
            seconds,
            fps,
            max_duration,
            initial_speed,
            width,
            height,
            realtime,
            temp_dir,
        } => {
            commands::record::run(commands::record::RecordOptions {
                output,
                frames,
                seconds,
                fps,
                max_duration,
                initial_speed,
                width,
                height,
                realtime,
                temp_dir,
            })
            .await
        }
        Commands::Inspect { path, json } => commands::inspect::run(path, json),
        Commands::Check {
            codec,
            width,
            height,
            fps,
            save,
        } => commands::check::run(codec, width, height, fps, save).await,
    }
}
