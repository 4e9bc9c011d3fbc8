use anyhow::Context;
use polar_ble_bridge::infrastructure::logging::init_logger;
use polar_ble_bridge::{BridgeCommand, BridgeHandle, SettingsService, SimulatedSdk};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Failed to locate settings directory: {}", e);
        SettingsService::load_from("settings.json")
    });

    let _logging_guard = init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting Polar BLE bridge (settings: {})",
        settings.path().display()
    );

    let bridge_settings = settings.get().bridge.clone();
    let sdk = SimulatedSdk::demo(Duration::from_millis(
        bridge_settings.simulated_frame_interval_ms,
    ));
    let (bridge, mut events) = BridgeHandle::start(Arc::new(sdk), bridge_settings)?;

    // One JSON event per stdout line
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let mut line = match serde_json::to_vec(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode {}: {}", event.name(), e);
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = stdout.write_all(&line).await {
                warn!("Event output closed: {}", e);
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // One JSON command per stdin line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeCommand>(line) {
            Ok(BridgeCommand::Shutdown) => break,
            Ok(command) => {
                if bridge.send(command).is_err() {
                    warn!("Bridge worker stopped, exiting");
                    break;
                }
            }
            Err(e) => warn!("Ignoring malformed command {:?}: {}", line, e),
        }
    }

    info!("Shutting down");
    tokio::task::spawn_blocking(move || bridge.shutdown()).await?;
    printer.await?;
    Ok(())
}
