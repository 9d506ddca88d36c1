//! Set command implementation.

use anyhow::{Context, Result, anyhow, bail};
use brew_core::{CharacteristicRole, EventReceiver, OperationContext, SessionEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::DeviceArgs;
use crate::config::Config;
use crate::style;
use crate::util::{connect, require_device, session_config};

pub async fn cmd_set(
    device: DeviceArgs,
    value: f32,
    quiet: bool,
    no_color: bool,
    config: &Config,
) -> Result<()> {
    let address = require_device(device.device.clone(), config)?;
    let session = session_config(&device, config)?;
    let wait = session.operation_timeout * 2;

    let mut connection = connect(&address, session, !quiet).await?;
    let previous = connection.report.destination;

    let outcome = async {
        connection
            .session
            .request_write(CharacteristicRole::DestinationTemperature, value)
            .await
            .context("Failed to queue destination write")?;
        tokio::time::timeout(wait, wait_for_write(&mut connection.events))
            .await
            .map_err(|_| anyhow!("Timed out waiting for the controller to accept the write"))?
    }
    .await;
    connection.close().await;
    let written = outcome?;

    if !quiet {
        let message = match previous {
            Some(previous) => format!(
                "Destination temperature changed from {:.1}° to {:.1}°",
                previous, written
            ),
            None => format!("Destination temperature set to {:.1}°", written),
        };
        println!("{}", style::format_success(&message, no_color));
    }
    Ok(())
}

async fn wait_for_write(events: &mut EventReceiver) -> Result<f32> {
    loop {
        match events.recv().await {
            Ok(SessionEvent::DestinationWritten { value }) => return Ok(value),
            Ok(SessionEvent::OperationFailed {
                context: OperationContext::Write(_),
                error,
            }) => bail!("Controller rejected the write: {}", error),
            Ok(SessionEvent::Disconnected { reason, .. }) => {
                bail!("Disconnected before the write completed: {}", reason)
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("Session ended unexpectedly"),
        }
    }
}
