//! Bridge Service Module
//!
//! The worker that owns all bridge state. Host commands, SDK observer callbacks
//! and results from running subscriptions are all funnelled into
//! [`BridgeService::run`], so state is only ever touched from one task.

use crate::domain::commands::BridgeCommand;
use crate::domain::events::{
    BatteryPayload, BridgeEvent, DisPayload, ErrorPayload, StreamingFeaturesPayload,
};
use crate::domain::models::{
    DataType, ExerciseEntry, RecordingInterval, SampleType, SdkFeature, SensorSetting, StreamKind,
};
use crate::domain::settings::BridgeSettings;
use crate::infrastructure::bridge::session::DeviceSession;
use crate::infrastructure::bridge::subscription::{Slot, Subscription, SubscriptionSlots};
use crate::infrastructure::bridge::translate::{self, AccLayout};
use crate::infrastructure::sdk::{SdkCallback, SdkError, SdkResult, SensorSdk};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Where a message from a subscription task came from
#[derive(Debug, Clone)]
pub(crate) struct Origin {
    device: Option<String>,
    slot: Slot,
    serial: u64,
}

/// Messages from subscription tasks back to the worker
#[derive(Debug)]
pub(crate) enum Internal {
    Emit {
        origin: Origin,
        event: BridgeEvent,
    },
    Completed {
        origin: Origin,
    },
    Failed {
        device: Option<String>,
        operation: &'static str,
        error: SdkError,
    },
    StreamTypes {
        origin: Origin,
        types: Vec<DataType>,
    },
    ExerciseListed {
        origin: Origin,
        entry: ExerciseEntry,
    },
    ExerciseRemoved {
        identifier: String,
        entry_id: String,
    },
}

/// Everything a subscription task needs to drive one SDK operation
struct TaskContext {
    sdk: Arc<dyn SensorSdk>,
    internal: mpsc::UnboundedSender<Internal>,
    origin: Origin,
}

impl TaskContext {
    fn device(&self) -> &str {
        self.origin.device.as_deref().unwrap_or_default()
    }

    fn send(&self, message: Internal) -> bool {
        self.internal.send(message).is_ok()
    }

    fn emit(&self, event: BridgeEvent) -> bool {
        self.send(Internal::Emit {
            origin: self.origin.clone(),
            event,
        })
    }

    fn fail(&self, operation: &'static str, error: SdkError) {
        self.send(Internal::Failed {
            device: self.origin.device.clone(),
            operation,
            error,
        });
    }

    fn complete(self) {
        let _ = self.internal.send(Internal::Completed {
            origin: self.origin,
        });
    }

    /// Forward every item of `stream` until it ends or errors. An error ends
    /// the subscription but the slot stays occupied until the host stops it.
    async fn pump<T>(
        &self,
        mut stream: BoxStream<'static, SdkResult<T>>,
        operation: &'static str,
        mut translate: impl FnMut(T) -> Option<BridgeEvent>,
    ) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(item) => {
                    if let Some(event) = translate(item) {
                        if !self.emit(event) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.fail(operation, e);
                    return;
                }
            }
        }
        debug!("{} ended for {}", self.origin.slot, self.device());
    }

    /// Ask the device what it offers for `data_type` and pick the maximum of each setting
    async fn negotiate(&self, data_type: DataType, operation: &'static str) -> Option<SensorSetting> {
        match self.sdk.request_stream_settings(self.device(), data_type).await {
            Ok(offered) => {
                let setting = offered.max_settings();
                debug!("Using {:?} settings {:?} on {}", data_type, setting, self.device());
                Some(setting)
            }
            Err(e) => {
                self.fail(operation, e);
                None
            }
        }
    }
}

/// Single owner of sessions, subscriptions and the SDK handle
pub struct BridgeService {
    sdk: Arc<dyn SensorSdk>,
    settings: BridgeSettings,
    event_sender: mpsc::UnboundedSender<BridgeEvent>,
    callbacks: mpsc::UnboundedReceiver<SdkCallback>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    global: SubscriptionSlots,
    sessions: HashMap<String, DeviceSession>,
    next_serial: u64,
}

impl BridgeService {
    /// Create the service and register it as the SDK's observer
    pub fn new(
        sdk: Arc<dyn SensorSdk>,
        settings: BridgeSettings,
        event_sender: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        let (callback_tx, callbacks) = mpsc::unbounded_channel();
        sdk.set_observer(callback_tx);
        sdk.set_polar_filter(settings.polar_filter);

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            sdk,
            settings,
            event_sender,
            callbacks,
            internal_tx,
            internal_rx,
            global: SubscriptionSlots::new(),
            sessions: HashMap::new(),
            next_serial: 0,
        }
    }

    /// Process commands until the host sends `shutdown` or drops its sender
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BridgeCommand>) {
        info!("Bridge worker started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BridgeCommand::Shutdown) => {
                        self.handle_command(BridgeCommand::Shutdown);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("Command channel closed");
                        self.shutdown();
                        break;
                    }
                },
                Some(callback) = self.callbacks.recv() => self.handle_callback(callback),
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
        }
        // Refuse further commands before the event stream closes
        commands.close();
        info!("Bridge worker stopped");
    }

    pub fn handle_command(&mut self, command: BridgeCommand) {
        debug!("Command: {}", command.name());
        match command {
            BridgeCommand::SearchForDevice => self.search_for_device(),
            BridgeCommand::ConnectToDevice { id } => self.connect_to_device(&id),
            BridgeCommand::DisconnectFromDevice { id } => self.disconnect_from_device(&id),
            BridgeCommand::StartAutoConnectToDevice { rssi, device_type } => {
                self.start_auto_connect(rssi, device_type)
            }
            BridgeCommand::StartHrStreaming { id } => self.start_streaming(StreamKind::Hr, &id),
            BridgeCommand::StopHrStreaming { id } => self.stop_streaming(StreamKind::Hr, &id),
            BridgeCommand::StartEcgStreaming { id } => self.start_streaming(StreamKind::Ecg, &id),
            BridgeCommand::StopEcgStreaming { id } => self.stop_streaming(StreamKind::Ecg, &id),
            BridgeCommand::StartAccStreaming { id } => self.start_streaming(StreamKind::Acc, &id),
            BridgeCommand::StopAccStreaming { id } => self.stop_streaming(StreamKind::Acc, &id),
            BridgeCommand::StartPpgStreaming { id } => self.start_streaming(StreamKind::Ppg, &id),
            BridgeCommand::StopPpgStreaming { id } => self.stop_streaming(StreamKind::Ppg, &id),
            BridgeCommand::StartPpiStreaming { id } => self.start_streaming(StreamKind::Ppi, &id),
            BridgeCommand::StopPpiStreaming { id } => self.stop_streaming(StreamKind::Ppi, &id),
            BridgeCommand::GetH10RecordingStatus { id } => self.request_recording_status(&id),
            BridgeCommand::StartH10Recording {
                id,
                exercise_id,
                sample_type,
            } => self.start_recording(&id, exercise_id, &sample_type),
            BridgeCommand::StopH10Recording { id } => self.stop_recording(&id),
            BridgeCommand::ListExercises { id } => self.list_exercises(&id),
            BridgeCommand::ReadExercise { id, entry_id } => {
                self.read_exercise(&id, entry_id.as_deref())
            }
            BridgeCommand::RemoveExercise { id, entry_id } => {
                self.remove_exercise(&id, entry_id.as_deref())
            }
            BridgeCommand::ForegroundEntered => {
                debug!("Host entered foreground");
                self.sdk.foreground_entered();
            }
            BridgeCommand::Shutdown => self.shutdown(),
        }
    }

    pub fn handle_callback(&mut self, callback: SdkCallback) {
        match callback {
            SdkCallback::DeviceConnecting(info) => {
                info!("Connecting to {} ({})", info.name, info.device_id);
                self.emit(BridgeEvent::DeviceConnecting((&info).into()));
            }
            SdkCallback::DeviceConnected(info) => {
                info!("Connected to {} ({})", info.name, info.device_id);
                self.emit(BridgeEvent::DeviceConnected((&info).into()));

                let session = self.session_mut(&info.device_id);
                if info.name.contains("H10") {
                    session.recording_supported = true;
                    self.request_recording_status(&info.device_id);
                }
            }
            SdkCallback::DeviceDisconnected(info) => {
                info!("Disconnected from {} ({})", info.name, info.device_id);
                if let Some(mut session) = self.sessions.remove(&info.device_id) {
                    let ready: Vec<_> = session.ready_streams().collect();
                    let disposed = session.close();
                    debug!(
                        "Dropped session for {} (ready {:?}, {} subscriptions disposed)",
                        info.device_id, ready, disposed
                    );
                }
                self.emit(BridgeEvent::DeviceDisconnected((&info).into()));
            }
            SdkCallback::BatteryLevelReceived { identifier, level } => {
                debug!("Battery level of {}: {}%", identifier, level);
                self.emit(BridgeEvent::BatteryLevelReceived(BatteryPayload {
                    id: identifier,
                    value: level,
                }));
            }
            SdkCallback::DisInformationReceived {
                identifier,
                uuid,
                value,
            } => {
                self.emit(BridgeEvent::DisInformationReceived(DisPayload {
                    identifier,
                    uuid: uuid.to_string(),
                    value,
                }));
            }
            SdkCallback::BlePowerStateChanged(powered) => {
                info!("Bluetooth powered {}", if powered { "on" } else { "off" });
                self.emit(if powered {
                    BridgeEvent::BlePowerOn
                } else {
                    BridgeEvent::BlePowerOff
                });
            }
            SdkCallback::FeatureReady {
                identifier,
                feature,
            } => self.feature_ready(&identifier, feature),
        }
    }

    pub(crate) fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Emit { origin, event } => {
                if self.is_current(&origin) {
                    self.emit(event);
                } else {
                    trace!("Dropping {} from disposed {}", event.name(), origin.slot);
                }
            }
            Internal::Completed { origin } => {
                let slots = match &origin.device {
                    Some(id) => self.sessions.get_mut(id).map(|s| &mut s.subscriptions),
                    None => Some(&mut self.global),
                };
                if let Some(slots) = slots {
                    slots.release(origin.slot, origin.serial);
                }
            }
            Internal::Failed {
                device,
                operation,
                error,
            } => self.report_failure(device.as_deref(), operation, &error),
            Internal::StreamTypes { origin, types } => {
                let Some(identifier) = origin.device.clone() else {
                    return;
                };
                if !self.is_current(&origin) {
                    trace!("Dropping stream types of {}, session is gone", identifier);
                    return;
                }
                info!("Online stream types of {}: {:?}", identifier, types);
                for kind in types.iter().copied().filter_map(StreamKind::from_data_type) {
                    self.mark_ready(&identifier, kind);
                }
                self.emit(BridgeEvent::StreamingFeaturesReady(StreamingFeaturesPayload {
                    identifier,
                    streaming_features: types,
                }));
            }
            Internal::ExerciseListed { origin, entry } => {
                if !self.is_current(&origin) {
                    trace!("Dropping exercise {} from cancelled listing", entry.id);
                    return;
                }
                let payload = translate::exercise_entry_payload(&entry);
                let session = origin
                    .device
                    .as_deref()
                    .and_then(|id| self.sessions.get_mut(id));
                if let Some(session) = session {
                    session.push_exercise(entry);
                }
                self.emit(BridgeEvent::ExerciseEntry(payload));
            }
            Internal::ExerciseRemoved {
                identifier,
                entry_id,
            } => {
                info!("Removed exercise {} from {}", entry_id, identifier);
                if let Some(session) = self.sessions.get_mut(&identifier) {
                    session.forget_exercise(&entry_id);
                }
            }
        }
    }

    fn emit(&self, event: BridgeEvent) {
        trace!("Event: {}", event.name());
        let _ = self.event_sender.send(event);
    }

    fn report_failure(&self, device: Option<&str>, operation: &'static str, error: &SdkError) {
        match device {
            Some(id) => error!("{} failed for {}: {}", operation, id, error),
            None => error!("{} failed: {}", operation, error),
        }
        if self.settings.emit_error_events {
            self.emit(BridgeEvent::Error(ErrorPayload {
                command: operation.to_string(),
                message: error.to_string(),
            }));
        }
    }

    fn session_mut(&mut self, id: &str) -> &mut DeviceSession {
        self.sessions.entry(id.to_string()).or_default()
    }

    /// Whether output from `origin` may still reach the host. Device output
    /// needs a live session; disposable slots must still hold the subscription.
    fn is_current(&self, origin: &Origin) -> bool {
        let holds = |slots: &SubscriptionSlots| {
            !origin.slot.is_disposable() || slots.holds(origin.slot, origin.serial)
        };
        match &origin.device {
            Some(id) => self
                .sessions
                .get(id)
                .map_or(false, |s| holds(&s.subscriptions)),
            None => holds(&self.global),
        }
    }

    /// Start `task` in `slot`, returning whatever subscription it displaced.
    /// A displaced subscription keeps running unless the caller disposes it.
    fn spawn_task<F, Fut>(&mut self, device: Option<&str>, slot: Slot, task: F) -> Option<Subscription>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.next_serial += 1;
        let serial = self.next_serial;
        let context = TaskContext {
            sdk: Arc::clone(&self.sdk),
            internal: self.internal_tx.clone(),
            origin: Origin {
                device: device.map(str::to_string),
                slot,
                serial,
            },
        };
        let subscription = Subscription::spawn(serial, task(context));
        match device {
            Some(id) => self.session_mut(id).subscriptions.replace(slot, subscription),
            None => self.global.replace(slot, subscription),
        }
    }

    // Discovery and connection

    fn search_for_device(&mut self) {
        if self.global.dispose(Slot::Search) {
            debug!("Disposed previous scan");
        }
        info!("Searching for devices");
        self.spawn_task(None, Slot::Search, |ctx| async move {
            let devices = ctx.sdk.search_for_device();
            ctx.pump(devices, "searchForDevice", |info| {
                Some(BridgeEvent::DeviceFound((&info).into()))
            })
            .await;
            ctx.complete();
        });
    }

    fn connect_to_device(&mut self, id: &str) {
        info!("Connecting to device {}", id);
        if let Err(e) = self.sdk.connect_to_device(id) {
            self.report_failure(Some(id), "connectToDevice", &e);
        }
    }

    fn disconnect_from_device(&mut self, id: &str) {
        info!("Disconnecting from device {}", id);
        if let Err(e) = self.sdk.disconnect_from_device(id) {
            self.report_failure(Some(id), "disconnectFromDevice", &e);
        }
    }

    fn start_auto_connect(&mut self, rssi: Option<i32>, device_type: Option<String>) {
        let rssi = rssi.unwrap_or(self.settings.auto_connect_rssi);
        let device_type =
            device_type.unwrap_or_else(|| self.settings.auto_connect_device_type.clone());
        if self.global.dispose(Slot::AutoConnect) {
            debug!("Disposed previous auto-connect");
        }
        info!("Auto-connecting to {} at or above {} dBm", device_type, rssi);
        self.spawn_task(None, Slot::AutoConnect, move |ctx| async move {
            match ctx.sdk.auto_connect(rssi, Some(device_type)).await {
                Ok(()) => debug!("Auto-connect finished"),
                Err(e) => ctx.fail("startAutoConnectToDevice", e),
            }
            ctx.complete();
        });
    }

    // Features

    fn feature_ready(&mut self, identifier: &str, feature: SdkFeature) {
        debug!("Feature {:?} ready on {}", feature, identifier);
        match feature {
            SdkFeature::Hr => self.mark_ready(identifier, StreamKind::Hr),
            SdkFeature::OnlineStreaming => {
                let previous = self.spawn_task(Some(identifier), Slot::StreamTypes, |ctx| async move {
                    match ctx.sdk.available_stream_types(ctx.device()).await {
                        Ok(types) => {
                            let origin = ctx.origin.clone();
                            ctx.send(Internal::StreamTypes { origin, types });
                        }
                        Err(e) => ctx.fail("availableStreamTypes", e),
                    }
                    ctx.complete();
                });
                if let Some(previous) = previous {
                    previous.dispose();
                }
            }
            SdkFeature::H10ExerciseRecording => {
                self.session_mut(identifier).recording_supported = true;
            }
            SdkFeature::BatteryInfo
            | SdkFeature::DeviceInfo
            | SdkFeature::OfflineRecording
            | SdkFeature::DeviceTimeSetup
            | SdkFeature::SdkMode => {}
        }
    }

    fn mark_ready(&mut self, identifier: &str, kind: StreamKind) {
        self.session_mut(identifier).mark_ready(kind);
        self.emit(BridgeEvent::feature_ready(kind, identifier));
    }

    // Online streaming

    fn start_streaming(&mut self, kind: StreamKind, id: &str) {
        let slot = Slot::Stream(kind);
        match self.sessions.get(id) {
            Some(session) if session.is_ready(kind) => {
                if session.subscriptions.is_finished(slot) {
                    debug!("{} on {} has ended, stop it before restarting", slot, id);
                    return;
                }
                if session.subscriptions.is_active(slot) {
                    debug!("{} already running on {}", slot, id);
                    return;
                }
            }
            _ => {
                debug!("{} not ready on {}, ignoring start", slot, id);
                return;
            }
        }

        info!("Starting {} on {}", slot, id);
        let layout = AccLayout::from_legacy_flag(self.settings.legacy_acc_layout);
        self.spawn_task(Some(id), slot, move |ctx| stream_task(ctx, kind, layout));
    }

    fn stop_streaming(&mut self, kind: StreamKind, id: &str) {
        let slot = Slot::Stream(kind);
        let disposed = self
            .sessions
            .get_mut(id)
            .map_or(false, |s| s.subscriptions.dispose(slot));
        if disposed {
            info!("Stopped {} on {}", slot, id);
        } else {
            debug!("No {} running on {}", slot, id);
        }
    }

    // H10 exercise recording

    fn warn_unless_recording_supported(&self, id: &str) {
        let supported = self.sessions.get(id).map_or(false, |s| s.recording_supported);
        if !supported {
            warn!("{} has not announced exercise recording support", id);
        }
    }

    fn request_recording_status(&mut self, id: &str) {
        self.warn_unless_recording_supported(id);
        self.spawn_task(Some(id), Slot::RecordingStatus, |ctx| async move {
            match ctx.sdk.request_recording_status(ctx.device()).await {
                Ok(status) => {
                    info!(
                        "Recording status of {}: ongoing={} entry={}",
                        ctx.device(),
                        status.ongoing,
                        status.entry_id
                    );
                    ctx.emit(BridgeEvent::RecordStatus(translate::record_status_payload(
                        &status,
                    )));
                }
                Err(e) => ctx.fail("getH10RecordingStatus", e),
            }
            ctx.complete();
        });
    }

    fn start_recording(&mut self, id: &str, exercise_id: String, sample_type: &str) {
        self.warn_unless_recording_supported(id);
        let sample_type = SampleType::from_host(sample_type);
        let interval = RecordingInterval::Interval1s;
        info!(
            "Starting recording {} on {} ({:?} samples every {}s)",
            exercise_id,
            id,
            sample_type,
            interval.seconds()
        );
        self.spawn_task(Some(id), Slot::Recording, move |ctx| async move {
            let result = ctx
                .sdk
                .start_recording(ctx.device(), &exercise_id, interval, sample_type)
                .await;
            match result {
                Ok(()) => info!("Recording {} started on {}", exercise_id, ctx.device()),
                Err(e) => ctx.fail("startH10Recording", e),
            }
            ctx.complete();
        });
    }

    fn stop_recording(&mut self, id: &str) {
        self.warn_unless_recording_supported(id);
        info!("Stopping recording on {}", id);
        self.spawn_task(Some(id), Slot::Recording, |ctx| async move {
            match ctx.sdk.stop_recording(ctx.device()).await {
                Ok(()) => info!("Recording stopped on {}", ctx.device()),
                Err(e) => ctx.fail("stopH10Recording", e),
            }
            ctx.complete();
        });
    }

    // Stored exercises

    fn list_exercises(&mut self, id: &str) {
        let session = self.session_mut(id);
        session.clear_exercises();
        if session.subscriptions.dispose(Slot::ListExercises) {
            debug!("Disposed previous exercise listing on {}", id);
        }

        info!("Listing exercises on {}", id);
        self.spawn_task(Some(id), Slot::ListExercises, |ctx| async move {
            let mut entries = ctx.sdk.list_exercises(ctx.device());
            while let Some(item) = entries.next().await {
                match item {
                    Ok(entry) => {
                        let origin = ctx.origin.clone();
                        if !ctx.send(Internal::ExerciseListed { origin, entry }) {
                            return;
                        }
                    }
                    Err(e) => {
                        ctx.fail("listExercises", e);
                        break;
                    }
                }
            }
            ctx.complete();
        });
    }

    fn read_exercise(&mut self, id: &str, entry_id: Option<&str>) {
        let Some(session) = self.sessions.get(id) else {
            info!("No exercises listed for {}, list them first", id);
            return;
        };
        if session.subscriptions.is_active(Slot::FetchExercise) {
            debug!("Exercise fetch already in progress on {}", id);
            return;
        }
        let Some(entry) = session.find_exercise(entry_id).cloned() else {
            info!("No exercise to read on {}, list them first", id);
            return;
        };

        info!("Reading exercise {} from {}", entry.id, id);
        self.spawn_task(Some(id), Slot::FetchExercise, move |ctx| async move {
            match ctx.sdk.fetch_exercise(ctx.device(), &entry).await {
                Ok(data) => {
                    debug!(
                        "Fetched {} samples of exercise {}",
                        data.hr_samples.len(),
                        entry.id
                    );
                    ctx.emit(BridgeEvent::ReadExercise(translate::read_exercise_payload(
                        &data,
                    )));
                }
                Err(e) => ctx.fail("readExercise", e),
            }
            ctx.complete();
        });
    }

    fn remove_exercise(&mut self, id: &str, entry_id: Option<&str>) {
        let entry = self
            .sessions
            .get(id)
            .and_then(|s| s.find_exercise(entry_id))
            .cloned();
        let Some(entry) = entry else {
            info!("No exercise to remove on {}, list them first", id);
            return;
        };

        info!("Removing exercise {} from {}", entry.id, id);
        self.spawn_task(Some(id), Slot::RemoveExercise, move |ctx| async move {
            match ctx.sdk.remove_exercise(ctx.device(), &entry).await {
                Ok(()) => {
                    ctx.send(Internal::ExerciseRemoved {
                        identifier: ctx.device().to_string(),
                        entry_id: entry.id,
                    });
                }
                Err(e) => ctx.fail("removeExercise", e),
            }
            ctx.complete();
        });
    }

    fn shutdown(&mut self) {
        let mut disposed = self.global.dispose_all();
        for (_, mut session) in self.sessions.drain() {
            disposed += session.close();
        }
        info!("Shutting down sensor SDK ({} subscriptions disposed)", disposed);
        self.sdk.shutdown();
    }
}

async fn stream_task(ctx: TaskContext, kind: StreamKind, layout: AccLayout) {
    let id = ctx.device().to_string();
    match kind {
        StreamKind::Hr => {
            let stream = ctx.sdk.start_hr_streaming(&id);
            ctx.pump(stream, "startHrStreaming", |data| {
                translate::hr_payload(&id, &data).map(BridgeEvent::HrData)
            })
            .await;
        }
        StreamKind::Ecg => {
            if let Some(setting) = ctx.negotiate(DataType::Ecg, "startEcgStreaming").await {
                let stream = ctx.sdk.start_ecg_streaming(&id, setting);
                ctx.pump(stream, "startEcgStreaming", |data| {
                    Some(BridgeEvent::EcgData(translate::ecg_payload(&id, &data)))
                })
                .await;
            }
        }
        StreamKind::Acc => {
            if let Some(setting) = ctx.negotiate(DataType::Acc, "startAccStreaming").await {
                let stream = ctx.sdk.start_acc_streaming(&id, setting);
                ctx.pump(stream, "startAccStreaming", |data| {
                    Some(BridgeEvent::AccData(translate::acc_payload(&id, &data, layout)))
                })
                .await;
            }
        }
        StreamKind::Ppg => {
            if let Some(setting) = ctx.negotiate(DataType::Ppg, "startPpgStreaming").await {
                let stream = ctx.sdk.start_ppg_streaming(&id, setting);
                ctx.pump(stream, "startPpgStreaming", |data| {
                    Some(BridgeEvent::PpgData(translate::ppg_payload(&id, &data)))
                })
                .await;
            }
        }
        StreamKind::Ppi => {
            let stream = ctx.sdk.start_ppi_streaming(&id);
            ctx.pump(stream, "startPpiStreaming", |data| {
                Some(BridgeEvent::PpiData(translate::ppi_payload(&id, &data)))
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AccData, AccSample, HrData, HrSample, SettingType};
    use crate::infrastructure::sdk::simulated::{SimulatedDevice, SimulatedSdk};
    use chrono::DateTime;
    use std::time::Duration;

    const H10: &str = "C1C6082D";
    const SENSE: &str = "B5D1A22C";

    struct Harness {
        service: BridgeService,
        sdk: SimulatedSdk,
        events: mpsc::UnboundedReceiver<BridgeEvent>,
    }

    impl Harness {
        fn new(settings: BridgeSettings) -> Self {
            Self::with_devices(
                vec![
                    SimulatedDevice::h10(H10),
                    SimulatedDevice::verity_sense(SENSE),
                ],
                settings,
            )
        }

        fn with_devices(devices: Vec<SimulatedDevice>, settings: BridgeSettings) -> Self {
            let sdk = SimulatedSdk::new(devices);
            let (event_tx, events) = mpsc::unbounded_channel();
            let service = BridgeService::new(Arc::new(sdk.clone()), settings, event_tx);
            Self {
                service,
                sdk,
                events,
            }
        }

        /// Run the worker's queues until nothing arrives for a while
        async fn settle(&mut self) {
            let service = &mut self.service;
            loop {
                tokio::select! {
                    Some(callback) = service.callbacks.recv() => service.handle_callback(callback),
                    Some(message) = service.internal_rx.recv() => service.handle_internal(message),
                    _ = tokio::time::sleep(Duration::from_millis(50)) => break,
                }
            }
        }

        /// Handle pending SDK callbacks, leaving task results queued
        fn handle_callbacks(&mut self) {
            while let Ok(callback) = self.service.callbacks.try_recv() {
                self.service.handle_callback(callback);
            }
        }

        async fn command(&mut self, command: BridgeCommand) -> Vec<BridgeEvent> {
            self.service.handle_command(command);
            self.settle().await;
            self.drain()
        }

        fn drain(&mut self) -> Vec<BridgeEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        async fn connect(&mut self, id: &str) -> Vec<BridgeEvent> {
            self.command(BridgeCommand::ConnectToDevice { id: id.to_string() })
                .await
        }

        fn is_ready(&self, id: &str, kind: StreamKind) -> bool {
            self.service
                .sessions
                .get(id)
                .map_or(false, |s| s.is_ready(kind))
        }

        fn exercise_ids(&self, id: &str) -> Vec<String> {
            self.service
                .sessions
                .get(id)
                .map(|s| s.exercises().iter().map(|e| e.id.clone()).collect())
                .unwrap_or_default()
        }
    }

    fn names(events: &[BridgeEvent]) -> Vec<&'static str> {
        events.iter().map(BridgeEvent::name).collect()
    }

    fn hr_frame(hr: u32) -> HrData {
        HrData {
            samples: vec![HrSample {
                hr,
                rrs_ms: vec![60_000 / hr],
                rr_available: true,
                contact_status: true,
                contact_status_supported: true,
            }],
        }
    }

    fn acc_frame() -> AccData {
        AccData {
            samples: vec![AccSample {
                timestamp: 1,
                x: 10,
                y: 20,
                z: 30,
            }],
        }
    }

    #[tokio::test]
    async fn test_connect_announces_readiness() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h.connect(SENSE).await;

        let names = names(&events);
        assert_eq!(&names[..2], &["DEVICE_CONNECTING", "DEVICE_CONNECTED"]);
        assert!(names.contains(&"OHR_PPG_FEATURE_READY"));
        assert!(names.contains(&"OHR_PPI_FEATURE_READY"));
        assert!(!names.contains(&"ECG_FEATURE_READY"));
        assert!(names.contains(&"BATTERY_LEVEL_RECEIVED"));
        assert!(names.contains(&"DIS_INFORMATION_RECEIVED"));

        // The summary follows the per-type readiness events
        let readiness: Vec<_> = events
            .iter()
            .filter(|e| e.name().ends_with("READY"))
            .collect();
        match readiness.last() {
            Some(BridgeEvent::StreamingFeaturesReady(payload)) => {
                assert_eq!(payload.identifier, SENSE);
                assert!(payload.streaming_features.contains(&DataType::Gyro));
            }
            other => panic!("unexpected last readiness event {:?}", other),
        }

        for kind in [StreamKind::Hr, StreamKind::Acc, StreamKind::Ppg, StreamKind::Ppi] {
            assert!(h.is_ready(SENSE, kind));
        }
        assert!(!h.is_ready(SENSE, StreamKind::Ecg));
    }

    #[tokio::test]
    async fn test_hr_feature_ready_emits_one_event() {
        let mut h = Harness::new(BridgeSettings::default());
        h.sdk.emit(SdkCallback::FeatureReady {
            identifier: H10.to_string(),
            feature: SdkFeature::Hr,
        });
        h.settle().await;

        assert_eq!(
            h.drain(),
            vec![BridgeEvent::HrFeatureReady(H10.to_string())]
        );
        assert!(h.is_ready(H10, StreamKind::Hr));
    }

    #[tokio::test]
    async fn test_start_before_ready_is_ignored() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h
            .command(BridgeCommand::start_streaming(StreamKind::Ecg, H10))
            .await;

        assert!(events.is_empty());
        assert_eq!(h.sdk.calls().stream_starts(DataType::Ecg), 0);
        assert!(h.sdk.calls().settings_requests.is_empty());
    }

    #[tokio::test]
    async fn test_double_start_opens_one_stream() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;

        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        assert_eq!(h.sdk.calls().stream_starts(DataType::Hr), 1);
        assert_eq!(h.sdk.live_streams(H10, DataType::Hr), 1);

        assert_eq!(h.sdk.push_hr(H10, hr_frame(72)), 1);
        h.settle().await;
        let events = h.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            BridgeEvent::HrData(payload) => {
                assert_eq!(payload.id, H10);
                assert_eq!(payload.hr, 72);
                assert_eq!(payload.rrs_ms, vec![833]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_without_stream_is_noop() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        let events = h
            .command(BridgeCommand::stop_streaming(StreamKind::Acc, H10))
            .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_stream_and_drops_late_frames() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;

        // Let the stream task forward a frame without the worker consuming it
        h.sdk.push_hr(H10, hr_frame(80));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = h
            .command(BridgeCommand::stop_streaming(StreamKind::Hr, H10))
            .await;
        assert!(events.is_empty());
        assert_eq!(h.sdk.live_streams(H10, DataType::Hr), 0);
        assert_eq!(h.sdk.push_hr(H10, hr_frame(81)), 0);

        // A fresh start works again
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        assert_eq!(h.sdk.calls().stream_starts(DataType::Hr), 2);
    }

    #[tokio::test]
    async fn test_stream_negotiates_max_settings() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::start_streaming(StreamKind::Acc, H10))
            .await;

        let calls = h.sdk.calls();
        assert_eq!(
            calls.settings_requests,
            vec![(H10.to_string(), DataType::Acc)]
        );
        let (data_type, setting) = &calls.stream_settings_used[0];
        assert_eq!(*data_type, DataType::Acc);
        assert_eq!(setting.value(SettingType::SampleRate), Some(200));
        assert_eq!(setting.value(SettingType::Range), Some(8));
    }

    #[tokio::test]
    async fn test_settings_failure_keeps_slot_until_stop() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.sdk.fail_operation(
            "settings",
            SdkError::OperationFailed("busy".to_string()),
        );

        let events = h
            .command(BridgeCommand::start_streaming(StreamKind::Ecg, H10))
            .await;
        assert!(events.is_empty());
        assert_eq!(h.sdk.calls().stream_starts(DataType::Ecg), 0);

        h.sdk.clear_failures();
        h.command(BridgeCommand::start_streaming(StreamKind::Ecg, H10))
            .await;
        assert_eq!(h.sdk.calls().settings_requests.len(), 1);

        h.command(BridgeCommand::stop_streaming(StreamKind::Ecg, H10))
            .await;
        h.command(BridgeCommand::start_streaming(StreamKind::Ecg, H10))
            .await;
        assert_eq!(h.sdk.calls().stream_starts(DataType::Ecg), 1);
    }

    #[tokio::test]
    async fn test_stream_error_is_reported_when_enabled() {
        let settings = BridgeSettings {
            emit_error_events: true,
            ..Default::default()
        };
        let mut h = Harness::new(settings);
        h.connect(H10).await;
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;

        h.sdk
            .fail_stream(H10, DataType::Hr, SdkError::BluetoothOff);
        h.settle().await;
        assert_eq!(
            h.drain(),
            vec![BridgeEvent::Error(ErrorPayload {
                command: "startHrStreaming".to_string(),
                message: "Bluetooth is powered off".to_string(),
            })]
        );

        // The dead subscription still occupies the slot
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        assert_eq!(h.sdk.calls().stream_starts(DataType::Hr), 1);
    }

    #[tokio::test]
    async fn test_acc_layouts() {
        for (legacy, expected_y, expected_z) in [(false, 20, Some(30)), (true, 30, None)] {
            let settings = BridgeSettings {
                legacy_acc_layout: legacy,
                ..Default::default()
            };
            let mut h = Harness::new(settings);
            h.connect(H10).await;
            h.command(BridgeCommand::start_streaming(StreamKind::Acc, H10))
                .await;

            h.sdk.push_acc(H10, acc_frame());
            h.settle().await;
            match h.drain().as_slice() {
                [BridgeEvent::AccData(payload)] => {
                    assert_eq!(payload.samples[0].x, 10);
                    assert_eq!(payload.samples[0].y, expected_y);
                    assert_eq!(payload.samples[0].z, expected_z);
                }
                other => panic!("unexpected events {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_disconnect_resets_only_that_device() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.connect(SENSE).await;
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;

        let events = h
            .command(BridgeCommand::DisconnectFromDevice {
                id: H10.to_string(),
            })
            .await;
        assert_eq!(names(&events), vec!["DEVICE_DISCONNECTED"]);

        assert!(!h.is_ready(H10, StreamKind::Hr));
        assert!(h.is_ready(SENSE, StreamKind::Hr));

        let events = h
            .command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        assert!(events.is_empty());
        assert_eq!(h.sdk.calls().stream_starts(DataType::Hr), 1);
    }

    #[tokio::test]
    async fn test_results_queued_before_disconnect_are_dropped() {
        let mut h = Harness::new(BridgeSettings::default());
        h.service.handle_command(BridgeCommand::ConnectToDevice {
            id: H10.to_string(),
        });
        h.handle_callbacks();
        // Let the stream type and status queries answer without handling them
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = h.sdk.calls();
        assert_eq!(calls.stream_type_queries, vec![H10.to_string()]);
        assert_eq!(calls.status_requests, vec![H10.to_string()]);
        h.drain();

        h.service.handle_command(BridgeCommand::DisconnectFromDevice {
            id: H10.to_string(),
        });
        h.handle_callbacks();
        h.settle().await;

        assert_eq!(names(&h.drain()), vec!["DEVICE_DISCONNECTED"]);
        assert!(!h.service.sessions.contains_key(H10));

        let events = h
            .command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;
        assert!(events.is_empty());
        assert_eq!(h.sdk.calls().stream_starts(DataType::Hr), 0);
    }

    #[tokio::test]
    async fn test_h10_connection_queries_recording_status() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h.connect(H10).await;

        assert_eq!(h.sdk.calls().status_requests, vec![H10.to_string()]);
        assert!(events.contains(&BridgeEvent::RecordStatus(
            crate::domain::events::RecordStatusPayload {
                ongoing: false,
                entry_id: String::new(),
            }
        )));

        h.connect(SENSE).await;
        assert_eq!(h.sdk.calls().status_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_recording_sample_type() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;

        h.command(BridgeCommand::StartH10Recording {
            id: H10.to_string(),
            exercise_id: "run-1".to_string(),
            sample_type: "hr".to_string(),
        })
        .await;
        h.command(BridgeCommand::StopH10Recording { id: H10.to_string() })
            .await;
        h.command(BridgeCommand::StartH10Recording {
            id: H10.to_string(),
            exercise_id: "run-2".to_string(),
            sample_type: "HR".to_string(),
        })
        .await;

        let started = h.sdk.calls().recordings_started;
        assert_eq!(
            started,
            vec![
                (
                    H10.to_string(),
                    "run-1".to_string(),
                    RecordingInterval::Interval1s,
                    SampleType::Hr
                ),
                (
                    H10.to_string(),
                    "run-2".to_string(),
                    RecordingInterval::Interval1s,
                    SampleType::Rr
                ),
            ]
        );
        assert_eq!(h.sdk.calls().recordings_stopped, vec![H10.to_string()]);

        let events = h
            .command(BridgeCommand::GetH10RecordingStatus { id: H10.to_string() })
            .await;
        assert_eq!(
            events,
            vec![BridgeEvent::RecordStatus(
                crate::domain::events::RecordStatusPayload {
                    ongoing: true,
                    entry_id: "run-2".to_string(),
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_list_replaces_previous_entries() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;

        let events = h
            .command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;
        assert_eq!(names(&events), vec!["EXERCISE_ENTRY"]);
        match &events[0] {
            BridgeEvent::ExerciseEntry(payload) => {
                assert_eq!(payload.id, "1709278200");
                assert_eq!(payload.date, "2024-03-01 07:30:00 UTC");
            }
            other => panic!("unexpected event {:?}", other),
        }

        h.command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;
        assert_eq!(h.exercise_ids(H10), vec!["1709278200".to_string()]);
    }

    #[tokio::test]
    async fn test_read_and_remove_require_listing() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;

        let events = h
            .command(BridgeCommand::ReadExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        assert!(events.is_empty());
        let events = h
            .command(BridgeCommand::RemoveExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        assert!(events.is_empty());

        let calls = h.sdk.calls();
        assert!(calls.fetches.is_empty());
        assert!(calls.removals.is_empty());
    }

    #[tokio::test]
    async fn test_read_first_exercise() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;

        let events = h
            .command(BridgeCommand::ReadExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        match events.as_slice() {
            [BridgeEvent::ReadExercise(payload)] => {
                assert_eq!(payload.interval, 1);
                assert_eq!(payload.samples.len(), 10);
                assert_eq!(payload.samples[0], 71);
            }
            other => panic!("unexpected events {:?}", other),
        }

        let events = h
            .command(BridgeCommand::ReadExercise {
                id: H10.to_string(),
                entry_id: Some("missing".to_string()),
            })
            .await;
        assert!(events.is_empty());
        assert_eq!(h.sdk.calls().fetches.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_in_progress_ignores_second_read() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;
        h.sdk.stall_fetches(true);

        for _ in 0..2 {
            h.command(BridgeCommand::ReadExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        }
        assert_eq!(h.sdk.calls().fetches.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_first_exercise() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;

        let events = h
            .command(BridgeCommand::RemoveExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        assert!(events.is_empty());
        assert_eq!(
            h.sdk.calls().removals,
            vec![(H10.to_string(), "1709278200".to_string())]
        );
        assert!(h.sdk.stored_exercises(H10).is_empty());
        assert!(h.exercise_ids(H10).is_empty());
    }

    fn h10_with_three_exercises() -> SimulatedDevice {
        let mut device = SimulatedDevice::h10(H10);
        for secs in [1_709_364_600, 1_709_451_000] {
            device.exercises.push(ExerciseEntry {
                id: secs.to_string(),
                path: format!("/U/0/{}/E/SAMPLES.BPB", secs),
                date: DateTime::from_timestamp(secs, 0).unwrap(),
            });
        }
        device
    }

    #[tokio::test]
    async fn test_exercise_commands_use_first_of_several_entries() {
        let mut h = Harness::with_devices(
            vec![h10_with_three_exercises()],
            BridgeSettings::default(),
        );
        h.connect(H10).await;

        let events = h
            .command(BridgeCommand::ListExercises { id: H10.to_string() })
            .await;
        let listed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BridgeEvent::ExerciseEntry(payload) => Some(payload.id.clone()),
                _ => None,
            })
            .collect();
        let expected = vec![
            "1709278200".to_string(),
            "1709364600".to_string(),
            "1709451000".to_string(),
        ];
        assert_eq!(names(&events), vec!["EXERCISE_ENTRY"; 3]);
        assert_eq!(listed, expected);
        assert_eq!(h.exercise_ids(H10), expected);

        let events = h
            .command(BridgeCommand::ReadExercise {
                id: H10.to_string(),
                entry_id: None,
            })
            .await;
        assert_eq!(names(&events), vec!["READ_EXERCISE"]);
        assert_eq!(
            h.sdk.calls().fetches,
            vec![(H10.to_string(), "1709278200".to_string())]
        );

        h.command(BridgeCommand::RemoveExercise {
            id: H10.to_string(),
            entry_id: None,
        })
        .await;
        assert_eq!(
            h.sdk.calls().removals,
            vec![(H10.to_string(), "1709278200".to_string())]
        );
        assert_eq!(h.exercise_ids(H10), expected[1..].to_vec());
        let stored: Vec<_> = h
            .sdk
            .stored_exercises(H10)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(stored, expected[1..].to_vec());
    }

    #[tokio::test]
    async fn test_search_reports_devices_and_replaces_scan() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h.command(BridgeCommand::SearchForDevice).await;
        assert_eq!(names(&events), vec!["DEVICE_FOUND", "DEVICE_FOUND"]);

        h.command(BridgeCommand::SearchForDevice).await;
        assert_eq!(h.sdk.calls().searches, 2);
        assert!(!h.service.global.is_active(Slot::Search));
    }

    #[tokio::test]
    async fn test_auto_connect_uses_defaults() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h
            .command(BridgeCommand::StartAutoConnectToDevice {
                rssi: None,
                device_type: None,
            })
            .await;

        assert_eq!(
            h.sdk.calls().auto_connects,
            vec![(-55, Some("H10".to_string()))]
        );
        assert!(h.sdk.is_connected(H10));
        assert!(names(&events).contains(&"DEVICE_CONNECTED"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_silent_by_default() {
        let mut h = Harness::new(BridgeSettings::default());
        let events = h
            .command(BridgeCommand::ConnectToDevice {
                id: "FFFFFFFF".to_string(),
            })
            .await;
        assert!(events.is_empty());

        h.service.settings.emit_error_events = true;
        let events = h
            .command(BridgeCommand::ConnectToDevice {
                id: "FFFFFFFF".to_string(),
            })
            .await;
        assert_eq!(
            events,
            vec![BridgeEvent::Error(ErrorPayload {
                command: "connectToDevice".to_string(),
                message: "device not found: FFFFFFFF".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_observer_events_are_forwarded() {
        let mut h = Harness::new(BridgeSettings::default());
        h.sdk.emit(SdkCallback::BlePowerStateChanged(false));
        h.sdk.emit(SdkCallback::BatteryLevelReceived {
            identifier: H10.to_string(),
            level: 87,
        });
        h.settle().await;

        assert_eq!(
            h.drain(),
            vec![
                BridgeEvent::BlePowerOff,
                BridgeEvent::BatteryLevelReceived(BatteryPayload {
                    id: H10.to_string(),
                    value: 87,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_disposes_everything() {
        let mut h = Harness::new(BridgeSettings::default());
        h.connect(H10).await;
        h.command(BridgeCommand::start_streaming(StreamKind::Hr, H10))
            .await;

        h.command(BridgeCommand::Shutdown).await;
        assert!(h.sdk.is_shut_down());
        assert_eq!(h.sdk.calls().shutdowns, 1);
        assert!(h.service.sessions.is_empty());
        assert!(h.service.global.is_empty());
    }
}
