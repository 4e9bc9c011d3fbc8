//! Host-facing side of the bridge

use crate::domain::commands::BridgeCommand;
use crate::domain::events::BridgeEvent;
use crate::domain::models::StreamKind;
use crate::domain::settings::BridgeSettings;
use crate::infrastructure::bridge::service::BridgeService;
use crate::infrastructure::sdk::SensorSdk;
use anyhow::Context;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

#[derive(Debug, Error)]
#[error("bridge worker has stopped")]
pub struct BridgeClosed;

/// Sends commands to the bridge worker. Every call returns immediately;
/// results arrive on the event receiver handed out by [`BridgeHandle::start`].
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    worker: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Start the worker thread that owns `sdk`
    pub fn start(
        sdk: Arc<dyn SensorSdk>,
        settings: BridgeSettings,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<BridgeEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime for the bridge")?;

        let worker = std::thread::Builder::new()
            .name("bridge-worker".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let service = BridgeService::new(sdk, settings, event_tx);
                    service.run(command_rx).await;
                });
            })
            .context("Failed to spawn bridge worker thread")?;

        Ok((
            Self {
                commands: command_tx,
                worker: Some(worker),
            },
            event_rx,
        ))
    }

    pub fn send(&self, command: BridgeCommand) -> Result<(), BridgeClosed> {
        self.commands.send(command).map_err(|_| BridgeClosed)
    }

    pub fn search_for_device(&self) -> Result<(), BridgeClosed> {
        self.send(BridgeCommand::SearchForDevice)
    }

    pub fn connect_to_device(&self, id: &str) -> Result<(), BridgeClosed> {
        self.send(BridgeCommand::ConnectToDevice { id: id.to_string() })
    }

    pub fn disconnect_from_device(&self, id: &str) -> Result<(), BridgeClosed> {
        self.send(BridgeCommand::DisconnectFromDevice { id: id.to_string() })
    }

    pub fn start_streaming(&self, kind: StreamKind, id: &str) -> Result<(), BridgeClosed> {
        self.send(BridgeCommand::start_streaming(kind, id))
    }

    pub fn stop_streaming(&self, kind: StreamKind, id: &str) -> Result<(), BridgeClosed> {
        self.send(BridgeCommand::stop_streaming(kind, id))
    }

    /// Ask the worker to shut the SDK down and wait for it to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.commands.send(BridgeCommand::Shutdown).is_err() {
            warn!("Bridge worker already gone");
        }
        if worker.join().is_err() {
            error!("Bridge worker panicked");
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
