//! Sensor SDK seam
//!
//! The bridge never talks BLE itself. Everything below the bridge is a
//! [`SensorSdk`]: a vendor SDK binding on a real phone, or [`SimulatedSdk`] for
//! the demo binary and the tests.
//!
//! The SDK reports connection-level happenings through an observer channel
//! ([`SdkCallback`]) and everything else through futures and streams.
//! Dropping a returned stream cancels the underlying SDK operation.

pub mod simulated;

pub use simulated::SimulatedSdk;

use crate::domain::models::{
    AccData, DataType, DeviceInfo, EcgData, ExerciseData, ExerciseEntry, HrData, PpgData,
    PpiData, RecordingInterval, RecordingStatus, SampleType, SdkFeature, SensorSetting,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("Bluetooth is powered off")]
    BluetoothOff,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device not connected: {0}")]
    NotConnected(String),

    #[error("operation not supported by {device}: {operation}")]
    NotSupported { device: String, operation: String },

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Observer notifications pushed by the SDK
#[derive(Debug, Clone, PartialEq)]
pub enum SdkCallback {
    DeviceConnecting(DeviceInfo),
    DeviceConnected(DeviceInfo),
    DeviceDisconnected(DeviceInfo),
    BatteryLevelReceived {
        identifier: String,
        level: u8,
    },
    DisInformationReceived {
        identifier: String,
        uuid: Uuid,
        value: String,
    },
    BlePowerStateChanged(bool),
    FeatureReady {
        identifier: String,
        feature: SdkFeature,
    },
}

#[async_trait]
pub trait SensorSdk: Send + Sync + 'static {
    /// Register the channel that receives [`SdkCallback`]s; replaces any earlier one
    fn set_observer(&self, observer: mpsc::UnboundedSender<SdkCallback>);

    /// Restrict scan results to the vendor's own devices
    fn set_polar_filter(&self, enabled: bool);

    fn search_for_device(&self) -> BoxStream<'static, SdkResult<DeviceInfo>>;

    /// Request a connection; progress arrives through the observer
    fn connect_to_device(&self, identifier: &str) -> SdkResult<()>;

    fn disconnect_from_device(&self, identifier: &str) -> SdkResult<()>;

    /// Connect to the first device at or above `rssi` dBm, optionally of `device_type`
    async fn auto_connect(&self, rssi: i32, device_type: Option<String>) -> SdkResult<()>;

    async fn available_stream_types(&self, identifier: &str) -> SdkResult<Vec<DataType>>;

    async fn request_stream_settings(
        &self,
        identifier: &str,
        data_type: DataType,
    ) -> SdkResult<SensorSetting>;

    fn start_hr_streaming(&self, identifier: &str) -> BoxStream<'static, SdkResult<HrData>>;

    fn start_ecg_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<EcgData>>;

    fn start_acc_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<AccData>>;

    fn start_ppg_streaming(
        &self,
        identifier: &str,
        setting: SensorSetting,
    ) -> BoxStream<'static, SdkResult<PpgData>>;

    fn start_ppi_streaming(&self, identifier: &str) -> BoxStream<'static, SdkResult<PpiData>>;

    async fn request_recording_status(&self, identifier: &str) -> SdkResult<RecordingStatus>;

    async fn start_recording(
        &self,
        identifier: &str,
        exercise_id: &str,
        interval: RecordingInterval,
        sample_type: SampleType,
    ) -> SdkResult<()>;

    async fn stop_recording(&self, identifier: &str) -> SdkResult<()>;

    fn list_exercises(&self, identifier: &str) -> BoxStream<'static, SdkResult<ExerciseEntry>>;

    async fn fetch_exercise(
        &self,
        identifier: &str,
        entry: &ExerciseEntry,
    ) -> SdkResult<ExerciseData>;

    async fn remove_exercise(&self, identifier: &str, entry: &ExerciseEntry) -> SdkResult<()>;

    /// The host app came back to the foreground
    fn foreground_entered(&self);

    /// Release every SDK resource; the SDK is unusable afterwards
    fn shutdown(&self);
}
