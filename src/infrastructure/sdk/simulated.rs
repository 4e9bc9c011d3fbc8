//! In-process sensor SDK.
//!
//! Holds a scripted set of devices and answers every [`SensorSdk`] call from
//! memory. Streams are fed either by the caller (`push_*`) or, when a frame
//! interval is configured, by a generator task producing synthetic frames.
//! Every call is recorded in [`SdkCalls`] so the bridge's use of the SDK can be
//! asserted on.

use crate::domain::models::{
    AccData, AccSample, DataType, DeviceInfo, EcgData, EcgSample, ExerciseData, ExerciseEntry,
    HrData, HrSample, PpgData, PpgSample, PpiData, PpiSample, RecordingInterval,
    RecordingStatus, SampleType, SdkFeature, SensorSetting, SettingType,
};
use crate::infrastructure::sdk::{SdkCallback, SdkError, SdkResult, SensorSdk};
use async_trait::async_trait;
use chrono::DateTime;
use futures::channel::mpsc as feed;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Device Information Service, Firmware Revision String characteristic
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x0000_2a26_0000_1000_8000_0080_5f9b_34fb);

/// A device the simulated SDK can find and connect to
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub info: DeviceInfo,
    /// Features announced through the observer right after connecting
    pub features: Vec<SdkFeature>,
    pub stream_types: Vec<DataType>,
    pub stream_settings: HashMap<DataType, SensorSetting>,
    pub exercises: Vec<ExerciseEntry>,
    pub exercise_data: HashMap<String, ExerciseData>,
    pub recording: RecordingStatus,
    pub battery_level: u8,
    pub firmware: String,
}

impl SimulatedDevice {
    /// A Polar H10 chest strap with one stored exercise
    pub fn h10(device_id: &str) -> Self {
        let entry = ExerciseEntry {
            id: "1709278200".to_string(),
            path: "/U/0/20240301/E/073000/SAMPLES.BPB".to_string(),
            date: DateTime::from_timestamp(1_709_278_200, 0).unwrap_or_default(),
        };
        let data = ExerciseData {
            recording_interval: 1,
            hr_samples: vec![71, 72, 74, 77, 81, 84, 86, 85, 83, 80],
        };

        Self {
            info: DeviceInfo {
                device_id: device_id.to_string(),
                address: format!("A0:9E:1A:{}", address_suffix(device_id)),
                rssi: -52,
                name: format!("Polar H10 {}", device_id),
                is_connectable: true,
            },
            features: vec![
                SdkFeature::Hr,
                SdkFeature::BatteryInfo,
                SdkFeature::DeviceInfo,
                SdkFeature::H10ExerciseRecording,
                SdkFeature::OnlineStreaming,
            ],
            stream_types: vec![DataType::Hr, DataType::Ecg, DataType::Acc],
            stream_settings: HashMap::from([
                (
                    DataType::Ecg,
                    SensorSetting::new([
                        (SettingType::SampleRate, vec![130]),
                        (SettingType::Resolution, vec![14]),
                    ]),
                ),
                (
                    DataType::Acc,
                    SensorSetting::new([
                        (SettingType::SampleRate, vec![25, 50, 100, 200]),
                        (SettingType::Resolution, vec![16]),
                        (SettingType::Range, vec![2, 4, 8]),
                    ]),
                ),
            ]),
            exercises: vec![entry.clone()],
            exercise_data: HashMap::from([(entry.id, data)]),
            recording: RecordingStatus::default(),
            battery_level: 96,
            firmware: "3.1.1".to_string(),
        }
    }

    /// A Polar Verity Sense optical sensor (no offline exercise recording)
    pub fn verity_sense(device_id: &str) -> Self {
        Self {
            info: DeviceInfo {
                device_id: device_id.to_string(),
                address: format!("C4:2D:7A:{}", address_suffix(device_id)),
                rssi: -67,
                name: format!("Polar Sense {}", device_id),
                is_connectable: true,
            },
            features: vec![
                SdkFeature::Hr,
                SdkFeature::BatteryInfo,
                SdkFeature::DeviceInfo,
                SdkFeature::OfflineRecording,
                SdkFeature::OnlineStreaming,
            ],
            stream_types: vec![
                DataType::Hr,
                DataType::Acc,
                DataType::Ppg,
                DataType::Ppi,
                DataType::Gyro,
                DataType::Magnetometer,
            ],
            stream_settings: HashMap::from([
                (
                    DataType::Acc,
                    SensorSetting::new([
                        (SettingType::SampleRate, vec![52]),
                        (SettingType::Resolution, vec![16]),
                        (SettingType::Range, vec![8]),
                        (SettingType::Channels, vec![3]),
                    ]),
                ),
                (
                    DataType::Ppg,
                    SensorSetting::new([
                        (SettingType::SampleRate, vec![55]),
                        (SettingType::Resolution, vec![22]),
                        (SettingType::Channels, vec![4]),
                    ]),
                ),
            ]),
            exercises: Vec::new(),
            exercise_data: HashMap::new(),
            recording: RecordingStatus::default(),
            battery_level: 71,
            firmware: "2.1.0".to_string(),
        }
    }
}

fn address_suffix(device_id: &str) -> String {
    let hex: Vec<char> = device_id.chars().filter(char::is_ascii_hexdigit).collect();
    hex.chunks(2)
        .take(3)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// Record of every call the bridge made into the SDK
#[derive(Debug, Clone, Default)]
pub struct SdkCalls {
    pub searches: usize,
    pub connects: Vec<String>,
    pub disconnects: Vec<String>,
    pub auto_connects: Vec<(i32, Option<String>)>,
    pub stream_type_queries: Vec<String>,
    pub settings_requests: Vec<(String, DataType)>,
    pub stream_starts: HashMap<DataType, usize>,
    /// Setting each settings-negotiated stream was started with
    pub stream_settings_used: Vec<(DataType, SensorSetting)>,
    pub status_requests: Vec<String>,
    pub recordings_started: Vec<(String, String, RecordingInterval, SampleType)>,
    pub recordings_stopped: Vec<String>,
    pub list_requests: Vec<String>,
    pub fetches: Vec<(String, String)>,
    pub removals: Vec<(String, String)>,
    pub foreground_entered: usize,
    pub shutdowns: usize,
}

impl SdkCalls {
    pub fn stream_starts(&self, data_type: DataType) -> usize {
        self.stream_starts.get(&data_type).copied().unwrap_or(0)
    }
}

struct Feed<T> {
    identifier: String,
    sender: feed::UnboundedSender<SdkResult<T>>,
}

fn open_feed<T: Send + 'static>(
    feeds: &mut Vec<Feed<T>>,
    identifier: &str,
) -> (
    feed::UnboundedSender<SdkResult<T>>,
    BoxStream<'static, SdkResult<T>>,
) {
    feeds.retain(|f| !f.sender.is_closed());
    let (sender, receiver) = feed::unbounded();
    feeds.push(Feed {
        identifier: identifier.to_string(),
        sender: sender.clone(),
    });
    (sender, receiver.boxed())
}

fn push_feed<T: Clone>(feeds: &mut Vec<Feed<T>>, identifier: &str, item: SdkResult<T>) -> usize {
    feeds.retain(|f| !f.sender.is_closed());
    feeds
        .iter()
        .filter(|f| f.identifier == identifier)
        .filter(|f| f.sender.unbounded_send(item.clone()).is_ok())
        .count()
}

fn close_feeds<T>(feeds: &mut Vec<Feed<T>>, identifier: &str) {
    feeds.retain(|f| f.identifier != identifier);
}

fn live_feeds<T>(feeds: &[Feed<T>], identifier: &str) -> usize {
    feeds
        .iter()
        .filter(|f| f.identifier == identifier && !f.sender.is_closed())
        .count()
}

fn failed<T: Send + 'static>(error: SdkError) -> BoxStream<'static, SdkResult<T>> {
    stream::iter(vec![Err(error)]).boxed()
}

#[derive(Default)]
struct State {
    devices: Vec<SimulatedDevice>,
    connected: HashSet<String>,
    observer: Option<mpsc::UnboundedSender<SdkCallback>>,
    polar_filter: bool,
    frame_interval: Option<Duration>,
    failures: HashMap<&'static str, SdkError>,
    fetch_stalled: bool,
    shut_down: bool,
    calls: SdkCalls,

    hr_feeds: Vec<Feed<HrData>>,
    ecg_feeds: Vec<Feed<EcgData>>,
    acc_feeds: Vec<Feed<AccData>>,
    ppg_feeds: Vec<Feed<PpgData>>,
    ppi_feeds: Vec<Feed<PpiData>>,
}

impl State {
    fn device(&self, identifier: &str) -> SdkResult<&SimulatedDevice> {
        self.devices
            .iter()
            .find(|d| d.info.device_id == identifier)
            .ok_or_else(|| SdkError::DeviceNotFound(identifier.to_string()))
    }

    fn device_mut(&mut self, identifier: &str) -> SdkResult<&mut SimulatedDevice> {
        self.devices
            .iter_mut()
            .find(|d| d.info.device_id == identifier)
            .ok_or_else(|| SdkError::DeviceNotFound(identifier.to_string()))
    }

    fn check(&self, operation: &'static str) -> SdkResult<()> {
        if self.shut_down {
            return Err(SdkError::OperationFailed("SDK has been shut down".to_string()));
        }
        match self.failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn connected_device(
        &self,
        operation: &'static str,
        identifier: &str,
    ) -> SdkResult<&SimulatedDevice> {
        self.check(operation)?;
        let device = self.device(identifier)?;
        if !self.connected.contains(identifier) {
            return Err(SdkError::NotConnected(identifier.to_string()));
        }
        Ok(device)
    }

    fn check_stream(&mut self, identifier: &str, data_type: DataType) -> SdkResult<()> {
        *self.calls.stream_starts.entry(data_type).or_insert(0) += 1;
        let device = self.connected_device("stream", identifier)?;
        if !device.stream_types.contains(&data_type) {
            return Err(SdkError::NotSupported {
                device: identifier.to_string(),
                operation: format!("{:?} streaming", data_type),
            });
        }
        Ok(())
    }

    fn check_recording(&self, identifier: &str) -> SdkResult<()> {
        let device = self.connected_device("recording", identifier)?;
        if !device.features.contains(&SdkFeature::H10ExerciseRecording) {
            return Err(SdkError::NotSupported {
                device: identifier.to_string(),
                operation: "exercise recording".to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, callback: SdkCallback) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(callback);
        }
    }

    fn connect(&mut self, identifier: &str) -> SdkResult<()> {
        self.check("connect")?;
        let device = self.device(identifier)?.clone();
        if !self.connected.insert(identifier.to_string()) {
            debug!("Simulated device {} already connected", identifier);
            return Ok(());
        }

        info!("Simulated connection to {}", device.info.name);
        self.notify(SdkCallback::DeviceConnecting(device.info.clone()));
        self.notify(SdkCallback::DeviceConnected(device.info.clone()));
        for feature in &device.features {
            self.notify(SdkCallback::FeatureReady {
                identifier: identifier.to_string(),
                feature: *feature,
            });
        }
        if device.features.contains(&SdkFeature::BatteryInfo) {
            self.notify(SdkCallback::BatteryLevelReceived {
                identifier: identifier.to_string(),
                level: device.battery_level,
            });
        }
        if device.features.contains(&SdkFeature::DeviceInfo) {
            self.notify(SdkCallback::DisInformationReceived {
                identifier: identifier.to_string(),
                uuid: FIRMWARE_REVISION_UUID,
                value: device.firmware.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct SimulatedSdk {
    state: Arc<Mutex<State>>,
}

impl SimulatedSdk {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        let sdk = Self::default();
        sdk.state().devices = devices;
        sdk
    }

    /// One H10 and one Verity Sense, producing synthetic frames every `frame_interval`
    pub fn demo(frame_interval: Duration) -> Self {
        Self::new(vec![
            SimulatedDevice::h10("C1C6082D"),
            SimulatedDevice::verity_sense("B5D1A22C"),
        ])
        .with_frame_interval(frame_interval)
    }

    pub fn with_frame_interval(self, frame_interval: Duration) -> Self {
        self.state().frame_interval = Some(frame_interval);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an observer callback as if the SDK had raised it
    pub fn emit(&self, callback: SdkCallback) {
        self.state().notify(callback);
    }

    /// Make every subsequent call of `operation` fail with `error`.
    ///
    /// Operations: `search`, `connect`, `disconnect`, `auto_connect`,
    /// `stream_types`, `settings`, `stream`, `recording`, `list`, `fetch`, `remove`.
    pub fn fail_operation(&self, operation: &'static str, error: SdkError) {
        self.state().failures.insert(operation, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Keep exercise fetches pending forever
    pub fn stall_fetches(&self, stalled: bool) {
        self.state().fetch_stalled = stalled;
    }

    pub fn calls(&self) -> SdkCalls {
        self.state().calls.clone()
    }

    pub fn is_connected(&self, identifier: &str) -> bool {
        self.state().connected.contains(identifier)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    pub fn stored_exercises(&self, identifier: &str) -> Vec<ExerciseEntry> {
        self.state()
            .device(identifier)
            .map(|d| d.exercises.clone())
            .unwrap_or_default()
    }

    /// Number of open SDK streams of `data_type` towards `identifier`
    pub fn live_streams(&self, identifier: &str, data_type: DataType) -> usize {
        let state = self.state();
        match data_type {
            DataType::Hr => live_feeds(&state.hr_feeds, identifier),
            DataType::Ecg => live_feeds(&state.ecg_feeds, identifier),
            DataType::Acc => live_feeds(&state.acc_feeds, identifier),
            DataType::Ppg => live_feeds(&state.ppg_feeds, identifier),
            DataType::Ppi => live_feeds(&state.ppi_feeds, identifier),
            DataType::Gyro | DataType::Magnetometer => 0,
        }
    }

    // Frame injection; each returns how many open streams received the frame

    pub fn push_hr(&self, identifier: &str, data: HrData) -> usize {
        push_feed(&mut self.state().hr_feeds, identifier, Ok(data))
    }

    pub fn push_ecg(&self, identifier: &str, data: EcgData) -> usize {
        push_feed(&mut self.state().ecg_feeds, identifier, Ok(data))
    }

    pub fn push_acc(&self, identifier: &str, data: AccData) -> usize {
        push_feed(&mut self.state().acc_feeds, identifier, Ok(data))
    }

    pub fn push_ppg(&self, identifier: &str, data: PpgData) -> usize {
        push_feed(&mut self.state().ppg_feeds, identifier, Ok(data))
    }

    pub fn push_ppi(&self, identifier: &str, data: PpiData) -> usize {
        push_feed(&mut self.state().ppi_feeds, identifier, Ok(data))
    }

    /// Deliver an error on every open stream of `data_type` towards `identifier`
    pub fn fail_stream(&self, identifier: &str, data_type: DataType, error: SdkError) -> usize {
        let mut state = self.state();
        match data_type {
            DataType::Hr => push_feed(&mut state.hr_feeds, identifier, Err(error)),
            DataType::Ecg => push_feed(&mut state.ecg_feeds, identifier, Err(error)),
            DataType::Acc => push_feed(&mut state.acc_feeds, identifier, Err(error)),
            DataType::Ppg => push_feed(&mut state.ppg_feeds, identifier, Err(error)),
            DataType::Ppi => push_feed(&mut state.ppi_feeds, identifier, Err(error)),
            DataType::Gyro | DataType::Magnetometer => 0,
        }
    }
}

fn spawn_generator<T: Send + 'static>(
    sender: feed::UnboundedSender<SdkResult<T>>,
    period: Duration,
    make: fn(u64) -> T,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut seq = 0u64;
        loop {
            ticker.tick().await;
            if sender.unbounded_send(Ok(make(seq))).is_err() {
                break;
            }
            seq += 1;
        }
    });
}

// Synthetic frames. Values wander slowly so a host UI has something to plot.

const NANOS_PER_FRAME: u64 = 1_000_000_000;

fn synthetic_hr(seq: u64) -> HrData {
    let hr = 60 + (seq % 30) as u32;
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

fn synthetic_ecg(seq: u64) -> EcgData {
    let base = seq * NANOS_PER_FRAME;
    EcgData {
        samples: (0..73u64)
            .map(|i| EcgSample {
                timestamp: base + i * 7_692_307,
                voltage: if i % 73 == 36 { 1_100 } else { -40 + (i as i32 % 9) * 10 },
            })
            .collect(),
    }
}

fn synthetic_acc(seq: u64) -> AccData {
    let base = seq * NANOS_PER_FRAME;
    AccData {
        samples: (0..36u64)
            .map(|i| AccSample {
                timestamp: base + i * 5_000_000,
                x: (i as i32 % 12) - 6,
                y: -1_000 + (i as i32 % 5),
                z: 12 - (i as i32 % 7),
            })
            .collect(),
    }
}

fn synthetic_ppg(seq: u64) -> PpgData {
    let base = seq * NANOS_PER_FRAME;
    PpgData {
        samples: (0..28u64)
            .map(|i| {
                let wave = ((i % 28) as i32 - 14).abs() * 300;
                PpgSample {
                    timestamp: base + i * 18_181_818,
                    channel_samples: vec![
                        210_000 + wave,
                        209_500 + wave,
                        211_200 + wave,
                        1_800,
                    ],
                }
            })
            .collect(),
    }
}

fn synthetic_ppi(seq: u64) -> PpiData {
    let hr = 64 + (seq % 10) as u32;
    PpiData {
        timestamp: seq * NANOS_PER_FRAME,
        samples: vec![PpiSample {
            hr,
            pp_in_ms: 60_000 / hr,
            pp_error_estimate: 10,
            blocker_bit: false,
            skin_contact_status: true,
            skin_contact_supported: true,
        }],
    }
}

#[async_trait]
impl SensorSdk for SimulatedSdk {
    fn set_observer(&self, observer: mpsc::UnboundedSender<SdkCallback>) {
        self.state().observer = Some(observer);
    }

    fn set_polar_filter(&self, enabled: bool) {
        self.state().polar_filter = enabled;
    }

    fn search_for_device(&self) -> BoxStream<'static, SdkResult<DeviceInfo>> {
        let mut state = self.state();
        state.calls.searches += 1;
        if let Err(e) = state.check("search") {
            return failed(e);
        }

        let polar_only = state.polar_filter;
        let found: Vec<SdkResult<DeviceInfo>> = state
            .devices
            .iter()
            .filter(|d| !polar_only || d.info.name.starts_with("Polar"))
            .map(|d| Ok(d.info.clone()))
            .collect();
        stream::iter(found).boxed()
    }

    fn connect_to_device(&self, identifier: &str) -> SdkResult<()> {
        let mut state = self.state();
        state.calls.connects.push(identifier.to_string());
        state.connect(identifier)
    }

    fn disconnect_from_device(&self, identifier: &str) -> SdkResult<()> {
        let mut state = self.state();
        state.calls.disconnects.push(identifier.to_string());
        state.check("disconnect")?;
        let info = state.device(identifier)?.info.clone();
        if !state.connected.remove(identifier) {
            return Err(SdkError::NotConnected(identifier.to_string()));
        }

        close_feeds(&mut state.hr_feeds, identifier);
        close_feeds(&mut state.ecg_feeds, identifier);
        close_feeds(&mut state.acc_feeds, identifier);
        close_feeds(&mut state.ppg_feeds, identifier);
        close_feeds(&mut state.ppi_feeds, identifier);
        state.notify(SdkCallback::DeviceDisconnected(info));
        Ok(())
    }

    async fn auto_connect(&self, rssi: i32, device_type: Option<String>) -> SdkResult<()> {
        let mut state = self.state();
        state.calls.auto_connects.push((rssi, device_type.clone()));
        state.check("auto_connect")?;

        let candidate = state
            .devices
            .iter()
            .filter(|d| d.info.rssi >= rssi)
            .filter(|d| {
                device_type
                    .as_deref()
                    .map_or(true, |kind| d.info.name.contains(kind))
            })
            .max_by_key(|d| d.info.rssi)
            .map(|d| d.info.device_id.clone())
            .ok_or_else(|| SdkError::DeviceNotFound(format!("no device at or above {} dBm", rssi)))?;
        state.connect(&candidate)
    }

    async fn available_stream_types(&self, identifier: &str) -> SdkResult<Vec<DataType>> {
        let mut state = self.state();
        state.calls.stream_type_queries.push(identifier.to_string());
        let device = state.connected_device("stream_types", identifier)?;
        Ok(device.stream_types.clone())
    }

    async fn request_stream_settings(
        &self,
        identifier: &str,
        data_type: DataType,
    ) -> SdkResult<SensorSetting> {
        let mut state = self.state();
        state
            .calls
            .settings_requests
            .push((identifier.to_string(), data_type));
        let device = state.connected_device("settings", identifier)?;
        device
            .stream_settings
            .get(&data_type)
            .cloned()
            .ok_or_else(|| SdkError::NotSupported {
                device: identifier.to_string(),
                operation: format!("{:?} settings", data_type),
            })
    }

    fn start_hr_streaming(&self, identifier: &str) -> BoxStream<'static, SdkResult<HrData>> {
        let mut state = self.state();
        if let Err(e) = state.check_stream(identifier, DataType::Hr) {
            return failed(e);
        }
        let (sender, stream) = open_feed(&mut state.hr_feeds, identifier);
        if let Some(period) = state.frame_interval {
            spawn_generator(sender, period, synthetic_hr);
        }
        stream
    }

    fn start_ecg_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<EcgData>> {
        let mut state = self.state();
        state
            .calls
            .stream_settings_used
            .push((DataType::Ecg, setting));
        if let Err(e) = state.check_stream(identifier, DataType::Ecg) {
            return failed(e);
        }
        let (sender, stream) = open_feed(&mut state.ecg_feeds, identifier);
        if let Some(period) = state.frame_interval {
            spawn_generator(sender, period, synthetic_ecg);
        }
        stream
    }

    fn start_acc_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<AccData>> {
        let mut state = self.state();
        state
            .calls
            .stream_settings_used
            .push((DataType::Acc, setting));
        if let Err(e) = state.check_stream(identifier, DataType::Acc) {
            return failed(e);
        }
        let (sender, stream) = open_feed(&mut state.acc_feeds, identifier);
        if let Some(period) = state.frame_interval {
            spawn_generator(sender, period, synthetic_acc);
        }
        stream
    }

    fn start_ppg_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<PpgData>> {
        let mut state = self.state();
        state
            .calls
            .stream_settings_used
            .push((DataType::Ppg, setting));
        if let Err(e) = state.check_stream(identifier, DataType::Ppg) {
            return failed(e);
        }
        let (sender, stream) = open_feed(&mut state.ppg_feeds, identifier);
        if let Some(period) = state.frame_interval {
            spawn_generator(sender, period, synthetic_ppg);
        }
        stream
    }

    fn start_ppi_streaming(&self, identifier: &str) -> BoxStream<'static, SdkResult<PpiData>> {
        let mut state = self.state();
        if let Err(e) = state.check_stream(identifier, DataType::Ppi) {
            return failed(e);
        }
        let (sender, stream) = open_feed(&mut state.ppi_feeds, identifier);
        if let Some(period) = state.frame_interval {
            spawn_generator(sender, period, synthetic_ppi);
        }
        stream
    }

    async fn request_recording_status(&self, identifier: &str) -> SdkResult<RecordingStatus> {
        let mut state = self.state();
        state.calls.status_requests.push(identifier.to_string());
        state.check_recording(identifier)?;
        Ok(state.device(identifier)?.recording.clone())
    }

    async fn start_recording(
        &self,
        identifier: &str,
        exercise_id: &str,
        interval: RecordingInterval,
        sample_type: SampleType,
    ) -> SdkResult<()> {
        let mut state = self.state();
        state.calls.recordings_started.push((
            identifier.to_string(),
            exercise_id.to_string(),
            interval,
            sample_type,
        ));
        state.check_recording(identifier)?;

        let device = state.device_mut(identifier)?;
        if device.recording.ongoing {
            return Err(SdkError::OperationFailed(format!(
                "recording {} already ongoing",
                device.recording.entry_id
            )));
        }
        device.recording = RecordingStatus {
            ongoing: true,
            entry_id: exercise_id.to_string(),
        };
        Ok(())
    }

    async fn stop_recording(&self, identifier: &str) -> SdkResult<()> {
        let mut state = self.state();
        state.calls.recordings_stopped.push(identifier.to_string());
        state.check_recording(identifier)?;
        state.device_mut(identifier)?.recording.ongoing = false;
        Ok(())
    }

    fn list_exercises(&self, identifier: &str) -> BoxStream<'static, SdkResult<ExerciseEntry>> {
        let mut state = self.state();
        state.calls.list_requests.push(identifier.to_string());
        if let Err(e) = state.check_recording(identifier) {
            return failed(e);
        }
        if let Err(e) = state.check("list") {
            return failed(e);
        }
        match state.device(identifier) {
            Ok(device) => stream::iter(device.exercises.clone().into_iter().map(Ok)).boxed(),
            Err(e) => failed(e),
        }
    }

    async fn fetch_exercise(
        &self,
        identifier: &str,
        entry: &ExerciseEntry,
    ) -> SdkResult<ExerciseData> {
        let stalled = {
            let mut state = self.state();
            state
                .calls
                .fetches
                .push((identifier.to_string(), entry.id.clone()));
            state.check_recording(identifier)?;
            state.check("fetch")?;
            state.fetch_stalled
        };
        if stalled {
            futures::future::pending::<()>().await;
        }

        let state = self.state();
        state
            .device(identifier)?
            .exercise_data
            .get(&entry.id)
            .cloned()
            .ok_or_else(|| SdkError::OperationFailed(format!("no exercise at {}", entry.path)))
    }

    async fn remove_exercise(&self, identifier: &str, entry: &ExerciseEntry) -> SdkResult<()> {
        let mut state = self.state();
        state
            .calls
            .removals
            .push((identifier.to_string(), entry.id.clone()));
        state.check_recording(identifier)?;
        state.check("remove")?;

        let device = state.device_mut(identifier)?;
        let before = device.exercises.len();
        device.exercises.retain(|e| e.id != entry.id);
        if device.exercises.len() == before {
            return Err(SdkError::OperationFailed(format!("no exercise at {}", entry.path)));
        }
        device.exercise_data.remove(&entry.id);
        Ok(())
    }

    fn foreground_entered(&self) {
        self.state().calls.foreground_entered += 1;
    }

    fn shutdown(&self) {
        let mut state = self.state();
        state.calls.shutdowns += 1;
        state.shut_down = true;
        state.connected.clear();
        state.hr_feeds.clear();
        state.ecg_feeds.clear();
        state.acc_feeds.clear();
        state.ppg_feeds.clear();
        state.ppi_feeds.clear();
    }
}
