use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod pipeline_config;

#[derive(Parser)]
#[command(name = "millrace-cmd")]
#[command(about = "Command-line utility for running millrace stage pipelines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a numeric pipeline and print a JSON summary of its results
    Run {
        /// Path to the JSON pipeline configuration (defaults to the built-in one)
        #[arg(long)]
        config: Option<String>,

        /// Input value (can be specified multiple times, replaces the configured inputs)
        #[arg(short, long, allow_negative_numbers = true)]
        input: Vec<i64>,
    },

    /// Print the default pipeline configuration
    DefaultConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, input } => commands::run::run(config, input),
        Commands::DefaultConfig => commands::default_config::run(),
    }
}
