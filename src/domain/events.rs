//! Events delivered to the host.
//!
//! On the wire every event is `{"event": NAME, "body": payload}`, with payload
//! fields in camelCase. Events without a payload carry no `body`.

use serde::{Deserialize, Serialize};

use crate::domain::models::{DataType, DeviceInfo, StreamKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub device_id: String,
    pub address: String,
    pub rssi: i32,
    pub name: String,
    pub is_connectable: bool,
}

impl From<&DeviceInfo> for DevicePayload {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            device_id: info.device_id.clone(),
            address: info.address.clone(),
            rssi: info.rssi,
            name: info.name.clone(),
            is_connectable: info.is_connectable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryPayload {
    pub id: String,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisPayload {
    pub identifier: String,
    pub uuid: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingFeaturesPayload {
    pub identifier: String,
    pub streaming_features: Vec<DataType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrPayload {
    pub id: String,
    pub hr: u32,
    pub rrs_ms: Vec<u32>,
    pub rr_available: bool,
    pub contact_status: bool,
    pub contact_status_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcgSamplePayload {
    pub time_stamp: u64,
    pub voltage: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcgPayload {
    pub id: String,
    pub samples: Vec<EcgSamplePayload>,
}

/// `z` is absent when the legacy layout is in effect (Z written into the `y` slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccSamplePayload {
    pub time_stamp: u64,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccPayload {
    pub id: String,
    pub samples: Vec<AccSamplePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpgSamplePayload {
    pub time_stamp: u64,
    pub ppg0: i32,
    pub ppg1: i32,
    pub ppg2: i32,
    pub ambient: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpgPayload {
    pub id: String,
    pub samples: Vec<PpgSamplePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpiSamplePayload {
    pub hr: u32,
    pub pp_in_ms: u32,
    pub pp_error_estimate: u32,
    pub blocker_bit: bool,
    pub skin_contact_status: bool,
    pub skin_contact_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpiPayload {
    pub id: String,
    pub time_stamp: u64,
    pub samples: Vec<PpiSamplePayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatusPayload {
    pub ongoing: bool,
    pub entry_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseEntryPayload {
    pub id: String,
    pub path: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadExercisePayload {
    pub interval: u32,
    pub samples: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub command: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEvent {
    DeviceFound(DevicePayload),
    DeviceConnecting(DevicePayload),
    DeviceConnected(DevicePayload),
    DeviceDisconnected(DevicePayload),
    BatteryLevelReceived(BatteryPayload),
    DisInformationReceived(DisPayload),
    BlePowerOn,
    BlePowerOff,
    HrFeatureReady(String),
    EcgFeatureReady(String),
    AccFeatureReady(String),
    OhrPpgFeatureReady(String),
    OhrPpiFeatureReady(String),
    StreamingFeaturesReady(StreamingFeaturesPayload),
    HrData(HrPayload),
    EcgData(EcgPayload),
    AccData(AccPayload),
    PpgData(PpgPayload),
    PpiData(PpiPayload),
    RecordStatus(RecordStatusPayload),
    ExerciseEntry(ExerciseEntryPayload),
    ReadExercise(ReadExercisePayload),
    Error(ErrorPayload),
}

impl BridgeEvent {
    /// The readiness event announcing `kind` for `identifier`
    pub fn feature_ready(kind: StreamKind, identifier: &str) -> Self {
        let identifier = identifier.to_string();
        match kind {
            StreamKind::Hr => Self::HrFeatureReady(identifier),
            StreamKind::Ecg => Self::EcgFeatureReady(identifier),
            StreamKind::Acc => Self::AccFeatureReady(identifier),
            StreamKind::Ppg => Self::OhrPpgFeatureReady(identifier),
            StreamKind::Ppi => Self::OhrPpiFeatureReady(identifier),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceFound(_) => "DEVICE_FOUND",
            Self::DeviceConnecting(_) => "DEVICE_CONNECTING",
            Self::DeviceConnected(_) => "DEVICE_CONNECTED",
            Self::DeviceDisconnected(_) => "DEVICE_DISCONNECTED",
            Self::BatteryLevelReceived(_) => "BATTERY_LEVEL_RECEIVED",
            Self::DisInformationReceived(_) => "DIS_INFORMATION_RECEIVED",
            Self::BlePowerOn => "BLE_POWER_ON",
            Self::BlePowerOff => "BLE_POWER_OFF",
            Self::HrFeatureReady(_) => "HR_FEATURE_READY",
            Self::EcgFeatureReady(_) => "ECG_FEATURE_READY",
            Self::AccFeatureReady(_) => "ACC_FEATURE_READY",
            Self::OhrPpgFeatureReady(_) => "OHR_PPG_FEATURE_READY",
            Self::OhrPpiFeatureReady(_) => "OHR_PPI_FEATURE_READY",
            Self::StreamingFeaturesReady(_) => "STREAMING_FEATURES_READY",
            Self::HrData(_) => "HR_DATA",
            Self::EcgData(_) => "ECG_DATA",
            Self::AccData(_) => "ACC_DATA",
            Self::PpgData(_) => "PPG_DATA",
            Self::PpiData(_) => "PPI_DATA",
            Self::RecordStatus(_) => "RECORD_STATUS",
            Self::ExerciseEntry(_) => "EXERCISE_ENTRY",
            Self::ReadExercise(_) => "READ_EXERCISE",
            Self::Error(_) => "ERROR",
        }
    }
}
