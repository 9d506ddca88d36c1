//! `brewctl`: command-line client for BLE brew temperature controllers.
//!
//! Scans for controllers, reads the realtime and destination temperatures,
//! watches notifications and writes a new setpoint.

mod cli;
mod commands;
mod config;
mod format;
mod style;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, OutputFormat};
use commands::{WatchArgs, cmd_config, cmd_read, cmd_scan, cmd_set, cmd_watch};
use config::Config;
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "brewctl", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let no_color = cli.no_color || config.no_color;
    let opts = FormatOptions::new(no_color).with_compact(cli.compact);
    let output = cli.output.as_ref();
    let quiet = cli.quiet;

    // --json overrides any per-command format
    let pick = |format: OutputFormat| {
        if cli.json { OutputFormat::Json } else { format }
    };

    match cli.command {
        Commands::Scan {
            timeout,
            format,
            all,
        } => cmd_scan(timeout, pick(format), all, output, quiet, &opts).await,
        Commands::Read {
            device,
            format,
            role,
        } => cmd_read(device, pick(format), role, output, quiet, &opts, &config).await,
        Commands::Watch {
            device,
            format,
            count,
            notify_destination,
            no_reconnect,
        } => {
            let args = WatchArgs {
                device,
                format: pick(format),
                count,
                notify_destination,
                no_reconnect,
                output,
                quiet,
                opts: &opts,
            };
            cmd_watch(args, &config).await
        }
        Commands::Set { device, value } => cmd_set(device, value, quiet, no_color, &config).await,
        Commands::Config { action } => cmd_config(action, cli.json, quiet, &opts),
        Commands::Completions { .. } => Ok(()),
    }
}
