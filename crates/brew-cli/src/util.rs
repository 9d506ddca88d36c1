//! Utility functions for CLI operations.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use brew_core::{
    BleLink, CharacteristicRole, EventDispatcher, EventReceiver, OperationContext, ScanOptions,
    SessionConfig, SessionEvent, SessionHandle, link_channel, spawn_session,
};
use indicatif::ProgressBar;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::DeviceArgs;
use crate::config::{Config, resolve_device, resolve_timeout, update_last_device};
use crate::format::TemperatureReport;
use crate::style;

/// Default connection timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Get the controller address, with a helpful error message.
pub fn require_device(device: Option<String>, config: &Config) -> Result<String> {
    resolve_device(device, config).ok_or_else(|| {
        anyhow!(
            "No controller specified. Use --device <ADDRESS> or set BREW_DEVICE environment variable.\n\
             Run 'brewctl scan' to find nearby controllers."
        )
    })
}

/// Build the session configuration from command-line arguments and config.
pub fn session_config(args: &DeviceArgs, config: &Config) -> Result<SessionConfig> {
    let timeout = resolve_timeout(args.timeout, config, DEFAULT_TIMEOUT_SECS);
    let encoding = match args.encoding {
        Some(encoding) => Some(encoding.into()),
        None => config.destination_encoding()?,
    };

    let mut session = SessionConfig::default().connect_timeout(Duration::from_secs(timeout));
    if let Some(encoding) = encoding {
        session = session.destination_encoding(encoding);
    }
    Ok(session)
}

/// A session that reached the ready state.
pub struct Connection {
    pub session: SessionHandle,
    pub events: EventReceiver,
    /// Temperatures read during startup.
    pub report: TemperatureReport,
}

impl Connection {
    /// Disconnect and stop the session task.
    pub async fn close(self) {
        let _ = self.session.stop().await;
        self.session.shutdown().await;
    }
}

/// Connect to a controller and wait until its startup reads are done.
pub async fn connect(address: &str, config: SessionConfig, show_progress: bool) -> Result<Connection> {
    config.validate().context("Invalid session configuration")?;

    let spinner = (show_progress && io::stderr().is_terminal())
        .then(|| style::connecting_spinner(address));

    let (link_tx, link_rx) = link_channel();
    let scan = ScanOptions::default()
        .duration(config.connect_timeout / 4)
        .attempts(2);
    let link = BleLink::new(link_tx).await.scan_options(scan);
    if !link.has_adapter() {
        if let Some(sp) = &spinner {
            sp.finish_and_clear();
        }
        bail!(
            "No Bluetooth adapter found.\n\
             Make sure Bluetooth is enabled and this program may use it."
        );
    }

    let overall = config.connect_timeout + config.operation_timeout * 3;
    let dispatcher = EventDispatcher::default();
    let mut events = dispatcher.subscribe();
    let session = spawn_session(link, link_rx, dispatcher, config);

    let mut report = TemperatureReport::new(address);
    let outcome = async {
        session
            .start(address)
            .await
            .with_context(|| format!("Failed to start session with {}", address))?;
        tokio::time::timeout(
            overall,
            wait_until_ready(&mut events, &mut report, spinner.as_ref()),
        )
        .await
        .map_err(|_| anyhow!("Timed out after {:?} waiting for {}", overall, address))?
    }
    .await;

    if let Some(sp) = &spinner {
        sp.finish_and_clear();
    }
    if let Err(e) = outcome {
        session.shutdown().await;
        return Err(e.context(format!(
            "Failed to connect to {}\n\n\
             Possible causes:\n  \
             - Controller may be out of range or powered off\n  \
             - Controller may be connected to another client\n  \
             - Address may be incorrect -- run 'brewctl scan' to verify",
            address
        )));
    }

    // Remembering the device is a convenience
    if let Err(e) = update_last_device(address) {
        tracing::debug!("Failed to save last device: {}", e);
    }

    Ok(Connection {
        session,
        events,
        report,
    })
}

/// Consume events until the startup destination read has finished.
async fn wait_until_ready(
    events: &mut EventReceiver,
    report: &mut TemperatureReport,
    spinner: Option<&ProgressBar>,
) -> Result<()> {
    let mut ready = false;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Skipped {} session events", skipped);
                continue;
            }
            Err(RecvError::Closed) => bail!("Session ended unexpectedly"),
        };
        tracing::debug!(event = event.name(), "Session event");

        match event {
            SessionEvent::Connected { .. } => {
                if let Some(sp) = spinner {
                    sp.set_message("Discovering services...".to_string());
                }
            }
            SessionEvent::ServicesReady => {
                ready = true;
                if let Some(sp) = spinner {
                    sp.set_message("Reading temperatures...".to_string());
                }
            }
            SessionEvent::TemperatureUpdated { role, value } => {
                report.record(role, value);
                if ready && role == CharacteristicRole::DestinationTemperature {
                    return Ok(());
                }
            }
            SessionEvent::OperationFailed {
                context: OperationContext::Read(CharacteristicRole::DestinationTemperature),
                error,
            } => {
                tracing::warn!("Initial destination read failed: {}", error);
                return Ok(());
            }
            SessionEvent::ConnectionFailed { reason, .. } => {
                bail!("Connection failed: {}", reason)
            }
            SessionEvent::Disconnected { reason, .. } => bail!("Disconnected: {}", reason),
            _ => {}
        }
    }
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::EncodingArg;
    use brew_core::DestinationEncoding;

    fn device_args(timeout: u64, encoding: Option<EncodingArg>) -> DeviceArgs {
        DeviceArgs {
            device: None,
            timeout,
            encoding,
        }
    }

    #[test]
    fn test_require_device_with_none() {
        let err = require_device(None, &Config::initial()).unwrap_err().to_string();
        assert!(err.contains("No controller specified"));
        assert!(err.contains("BREW_DEVICE"));
    }

    #[test]
    fn test_require_device_uses_config() {
        let config = Config {
            device: Some("C4:4F:33:53:7A:57".to_string()),
            ..Config::initial()
        };
        assert_eq!(require_device(None, &config).unwrap(), "C4:4F:33:53:7A:57");
    }

    #[test]
    fn test_session_config_from_args() {
        let config = Config {
            encoding: Some("float".to_string()),
            timeout: Some(30),
            ..Config::initial()
        };

        let session = session_config(&device_args(DEFAULT_TIMEOUT_SECS, None), &config).unwrap();
        assert_eq!(session.connect_timeout, Duration::from_secs(30));
        assert_eq!(session.destination_encoding, DestinationEncoding::Float);

        let session =
            session_config(&device_args(5, Some(EncodingArg::Text)), &config).unwrap();
        assert_eq!(session.connect_timeout, Duration::from_secs(5));
        assert_eq!(session.destination_encoding, DestinationEncoding::Text);
    }

    #[test]
    fn test_session_config_rejects_bad_encoding() {
        let config = Config {
            encoding: Some("hex".to_string()),
            ..Config::initial()
        };
        assert!(session_config(&device_args(DEFAULT_TIMEOUT_SECS, None), &config).is_err());
    }

    #[test]
    fn test_write_output_to_file() {
        let path = std::env::temp_dir().join(format!("brewctl-test-{}.txt", std::process::id()));
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        std::fs::remove_file(&path).ok();
    }
}
