//! Mixdown CLI - Multi-track Mixing
//!
//! Command-line interface for the Mixdown engine.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::debug;

use mixdown::cli::{commands, Cli, Commands};
use mixdown::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_env().context("invalid environment configuration")?,
    };
    debug!("Mixdown v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd, config),
        None => {
            println!("Mixdown v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Probe { files } => commands::probe(&files)?,
        Commands::Waveform { file, bins } => commands::waveform(&config, &file, bins)?,
        Commands::Render {
            tracks,
            format,
            out_dir,
        } => commands::render(config, &tracks, format, out_dir.as_deref())
            .context("render failed")?,
        Commands::Play { tracks, mode } => {
            commands::play(config, &tracks, mode).context("preview failed")?
        }
        Commands::Chain => commands::chain(&config)?,
    }
    Ok(())
}
