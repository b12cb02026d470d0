use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vib::commands;
use vib::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing with RUST_LOG env filter
    // e.g., RUST_LOG=vib=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(plugin_dir = %cli.plugin_dir.display(), "Parsed command line");

    match cli.command {
        Commands::Compile(args) => commands::compile::run(args, &cli.plugin_dir),
        Commands::Plugins => commands::plugins::run(&cli.plugin_dir),
        Commands::Schema(args) => commands::schema::run(args),
        Commands::Completions(args) => commands::completions::run(args),
    }
}
