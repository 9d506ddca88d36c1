//! Example: Watching Controller Temperatures
//!
//! Connects to a controller, optionally sets a new destination
//! temperature, and prints every temperature update.
//!
//! Run with: `cargo run --example watch_temperature -- <ADDRESS> [SETPOINT]`

use std::env;

use brew_core::{
    BleLink, CharacteristicRole, EventDispatcher, SessionConfig, SessionEvent, link_channel,
    spawn_session,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(address) = args.get(1) else {
        eprintln!("Usage: {} <ADDRESS> [SETPOINT]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} C4:4F:33:53:7A:57 65.5", args[0]);
        std::process::exit(1);
    };
    let setpoint: Option<f32> = args.get(2).map(|s| s.parse()).transpose()?;

    let (link_tx, link_rx) = link_channel();
    let link = BleLink::new(link_tx).await;
    let dispatcher = EventDispatcher::default();
    let mut events = dispatcher.subscribe();

    let config = SessionConfig::default().reconnect(brew_core::RetryConfig::for_reconnect());
    let session = spawn_session(link, link_rx, dispatcher, config);

    println!("Connecting to {}...", address);
    session.start(address).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    SessionEvent::ServicesReady => {
                        println!("Connected!");
                        if let Some(value) = setpoint {
                            session
                                .request_write(CharacteristicRole::DestinationTemperature, value)
                                .await?;
                        }
                    }
                    SessionEvent::TemperatureUpdated { role, value } => {
                        println!("  {:<12} {:.1} °C", role.label(), value);
                    }
                    SessionEvent::DestinationWritten { value } => {
                        println!("  Destination set to {:.1} °C", value);
                    }
                    SessionEvent::ConnectionFailed { reason, .. } => {
                        eprintln!("Connection failed: {}", reason);
                    }
                    other => println!("  {}", other.name()),
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
