//! Watch command implementation.
//!
//! Keeps one session open and prints every temperature update. Link loss
//! is handled by the session runtime's reconnect policy, so this loop only
//! renders events until the runtime gives up.

use std::path::PathBuf;

use anyhow::Result;
use brew_core::{CharacteristicRole, RetryConfig, SessionEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::{DeviceArgs, OutputFormat};
use crate::config::Config;
use crate::format::{
    FormatOptions, TemperatureReport, WATCH_CSV_HEADER, format_report_text, format_watch_csv_line,
    format_watch_line,
};
use crate::util::{connect, require_device, session_config, write_output};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub device: DeviceArgs,
    pub format: OutputFormat,
    pub count: u32,
    pub notify_destination: bool,
    pub no_reconnect: bool,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(args: WatchArgs<'_>, config: &Config) -> Result<()> {
    let WatchArgs {
        device,
        format,
        count,
        notify_destination,
        no_reconnect,
        output,
        quiet,
        opts,
    } = args;

    let address = require_device(device.device.clone(), config)?;
    let mut session = session_config(&device, config)?.notify_destination(notify_destination);
    let reconnecting = config.reconnect && !no_reconnect;
    if reconnecting {
        session = session.reconnect(RetryConfig::for_reconnect());
    }

    let mut connection = connect(&address, session, !quiet).await?;
    let mut current = connection.report.clone();
    let mut updates: u32 = 0;
    let mut log = String::new();

    match format {
        OutputFormat::Text => emit(output, &mut log, &format_report_text(&current, opts))?,
        OutputFormat::Csv => emit(output, &mut log, WATCH_CSV_HEADER)?,
        OutputFormat::Json => {}
    }
    if !quiet {
        eprintln!("Watching {} (Ctrl+C to stop)", address);
    }

    loop {
        if count > 0 && updates >= count {
            break;
        }

        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            event = connection.events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Skipped {} session events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Some(line) = render(&event, format, &current, opts)? {
            emit(output, &mut log, &line)?;
        }

        let finished = ends_watch(&event, reconnecting);
        match event {
            SessionEvent::TemperatureUpdated { role, value } => {
                current.record(role, value);
                if role == CharacteristicRole::RealtimeTemperature {
                    updates += 1;
                }
            }
            SessionEvent::DestinationWritten { value } => {
                current.record(CharacteristicRole::DestinationTemperature, value);
            }
            _ => {}
        }
        if finished {
            break;
        }
    }

    connection.close().await;
    if count > 0 && !quiet {
        eprintln!("Received {} update(s).", updates);
    }
    Ok(())
}

/// Whether `event` leaves nothing more to watch.
///
/// With a reconnect policy the runtime follows every drop with either
/// `ReconnectScheduled` or `ReconnectAbandoned`, so only the latter ends
/// the watch.
fn ends_watch(event: &SessionEvent, reconnecting: bool) -> bool {
    match event {
        SessionEvent::ReconnectAbandoned { .. } => true,
        SessionEvent::ConnectionFailed { .. } | SessionEvent::Disconnected { .. } => !reconnecting,
        _ => false,
    }
}

fn render(
    event: &SessionEvent,
    format: OutputFormat,
    current: &TemperatureReport,
    opts: &FormatOptions,
) -> Result<Option<String>> {
    Ok(match format {
        OutputFormat::Json => Some(opts.with_compact(true).as_json(event)?),
        OutputFormat::Csv => format_watch_csv_line(event),
        OutputFormat::Text => {
            let previous = match event {
                SessionEvent::TemperatureUpdated { role, .. } => current.get(*role),
                _ => None,
            };
            format_watch_line(event, current, previous, opts)
        }
    })
}

/// Print a line, or accumulate it when writing to a file.
fn emit(output: Option<&PathBuf>, log: &mut String, content: &str) -> Result<()> {
    match output {
        Some(_) => {
            log.push_str(content);
            write_output(output, log)
        }
        None => write_output(None, content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brew_core::{DisconnectReason, GattStatus};

    fn link_lost() -> SessionEvent {
        SessionEvent::Disconnected {
            address: "C4:4F:33:53:7A:57".parse().unwrap(),
            reason: DisconnectReason::LinkLost {
                status: GattStatus::failure(),
            },
        }
    }

    #[test]
    fn test_drop_ends_watch_without_reconnect() {
        assert!(ends_watch(&link_lost(), false));
    }

    #[test]
    fn test_drop_keeps_watching_while_reconnecting() {
        assert!(!ends_watch(&link_lost(), true));
        assert!(!ends_watch(
            &SessionEvent::ReconnectScheduled {
                attempt: 1,
                delay: std::time::Duration::from_secs(2)
            },
            true
        ));
        assert!(ends_watch(&SessionEvent::ReconnectAbandoned { attempts: 5 }, true));
    }
}
