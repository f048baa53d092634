//! Command line front end.

mod commands;
pub mod display;

use std::path::PathBuf;
use clap::{Parser, Subcommand};
use crate::config::Settings;
use crate::profiler::ProfileConfig;
use commands::CommandContext;

#[derive(Parser, Debug)]
#[command(
    name = "tinyinfer",
    about = "Fixed-point neural network inference",
    version
)]
pub struct Cli {
    /// Configuration directory holding default.toml and local.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Profiling flags, e.g. "model,layer" (overrides the configuration)
    #[arg(long, global = true)]
    pub profile: Option<ProfileConfig>,

    /// Input Q-fraction bits (overrides the model default)
    #[arg(long, global = true)]
    pub input_q: Option<u8>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the metadata and memory needs of a model binary
    Info {
        model: PathBuf,
    },
    /// Run input frames through a model and print the outputs
    Run {
        model: PathBuf,
        /// Sample file to read frames from
        #[arg(long)]
        input: Option<PathBuf>,
        /// Comma-separated float inputs, one or more frames
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        values: Vec<f32>,
    },
    /// Compare model outputs against a reference file
    Validate {
        model: PathBuf,
        /// Sample file
        x: PathBuf,
        /// Reference file
        y: PathBuf,
    },
    /// Quantize a JSON float model into a model binary
    Pack {
        spec: PathBuf,
        output: PathBuf,
        /// Sample file used to measure the quantization error
        #[arg(long)]
        samples: Option<PathBuf>,
    },
    /// Serve a model over the host-link protocol
    Stream {
        model: PathBuf,
        /// Replay a sample file through an in-memory link instead of TCP
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// TCP port (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Time a model on random input
    Bench {
        model: PathBuf,
        #[arg(long)]
        frames: Option<usize>,
        /// Seed for reproducible input
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Execute a parsed command line with loaded settings.
pub fn run(cli: Cli, settings: &Settings) -> anyhow::Result<()> {
    let ctx = CommandContext {
        settings,
        profile: cli.profile.unwrap_or(settings.runtime.profile),
        input_q: cli.input_q.or(settings.runtime.input_q),
        json: cli.json,
    };

    match &cli.command {
        Commands::Info { model } => commands::handle_info(&ctx, model),
        Commands::Run { model, input, values } => commands::handle_run(&ctx, model, input.as_deref(), values),
        Commands::Validate { model, x, y } => commands::handle_validate(&ctx, model, x, y),
        Commands::Pack { spec, output, samples } => commands::handle_pack(&ctx, spec, output, samples.as_deref()),
        Commands::Stream { model, dataset, port } => commands::handle_stream(&ctx, model, dataset.as_deref(), *port),
        Commands::Bench { model, frames, seed } => commands::handle_bench(&ctx, model, *frames, *seed),
    }
}
