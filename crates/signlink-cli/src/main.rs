mod cli;
mod commands;
mod config;
mod style;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{MonitorArgs, SendArgs};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    // --quiet and --verbose override RUST_LOG; the config file comes last
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
        })
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    match cli.command {
        Commands::Scan { timeout, json } => {
            commands::cmd_scan(timeout, json, cli.quiet, &config).await?;
        }
        Commands::Send {
            device,
            transport,
            params,
            command,
        } => {
            let args = SendArgs {
                device,
                transport: transport.map(Into::into),
                params,
                command,
                quiet: cli.quiet,
            };
            commands::cmd_send(args, &config).await?;
        }
        Commands::Monitor {
            device,
            transport,
            json,
        } => {
            let args = MonitorArgs {
                devices: device,
                transport: transport.map(Into::into),
                json,
                quiet: cli.quiet,
                no_color: cli.no_color,
            };
            commands::cmd_monitor(args, &config).await?;
        }
        Commands::ListCommands { json } => {
            commands::cmd_commands(json)?;
        }
    }

    Ok(())
}
