use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a device as reported by the SDK (scan results and connection callbacks)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub address: String,
    pub rssi: i32,
    pub name: String,
    pub is_connectable: bool,
}

/// Features the SDK reports as ready once a device is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkFeature {
    Hr,
    BatteryInfo,
    DeviceInfo,
    H10ExerciseRecording,
    OfflineRecording,
    OnlineStreaming,
    DeviceTimeSetup,
    SdkMode,
}

/// Online stream data types a device can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Ecg,
    Hr,
    Acc,
    Ppg,
    Ppi,
    Gyro,
    Magnetometer,
}

/// The streams the bridge knows how to forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Hr,
    Ecg,
    Acc,
    Ppg,
    Ppi,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Hr,
        StreamKind::Ecg,
        StreamKind::Acc,
        StreamKind::Ppg,
        StreamKind::Ppi,
    ];

    /// Map an SDK data type onto a forwarded stream; gyro and magnetometer have none
    pub fn from_data_type(data_type: DataType) -> Option<Self> {
        match data_type {
            DataType::Hr => Some(Self::Hr),
            DataType::Ecg => Some(Self::Ecg),
            DataType::Acc => Some(Self::Acc),
            DataType::Ppg => Some(Self::Ppg),
            DataType::Ppi => Some(Self::Ppi),
            DataType::Gyro | DataType::Magnetometer => None,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Self::Hr => DataType::Hr,
            Self::Ecg => DataType::Ecg,
            Self::Acc => DataType::Acc,
            Self::Ppg => DataType::Ppg,
            Self::Ppi => DataType::Ppi,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hr => "hr",
            Self::Ecg => "ecg",
            Self::Acc => "acc",
            Self::Ppg => "ppg",
            Self::Ppi => "ppi",
        };
        f.write_str(name)
    }
}

/// Sensor setting dimensions negotiated before a stream starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    Channels,
}

/// Candidate values per setting type, as offered by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorSetting {
    pub settings: BTreeMap<SettingType, Vec<u32>>,
}

impl SensorSetting {
    pub fn new(settings: impl IntoIterator<Item = (SettingType, Vec<u32>)>) -> Self {
        Self {
            settings: settings.into_iter().collect(),
        }
    }

    /// Reduce every setting type to its largest offered value.
    ///
    /// Types with no offered values are dropped.
    pub fn max_settings(&self) -> SensorSetting {
        let settings = self
            .settings
            .iter()
            .filter_map(|(kind, values)| values.iter().max().map(|max| (*kind, vec![*max])))
            .collect();
        SensorSetting { settings }
    }

    pub fn value(&self, kind: SettingType) -> Option<u32> {
        self.settings.get(&kind).and_then(|v| v.first().copied())
    }
}

// Stream frames

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HrSample {
    pub hr: u32,
    pub rrs_ms: Vec<u32>,
    pub rr_available: bool,
    pub contact_status: bool,
    pub contact_status_supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HrData {
    pub samples: Vec<HrSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EcgSample {
    // Nanoseconds since the sensor epoch
    pub timestamp: u64,
    // Microvolts
    pub voltage: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EcgData {
    pub samples: Vec<EcgSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccSample {
    pub timestamp: u64,
    // Milli-g
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccData {
    pub samples: Vec<AccSample>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PpgSample {
    pub timestamp: u64,
    // Three optical channels followed by the ambient channel
    pub channel_samples: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PpgData {
    pub samples: Vec<PpgSample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PpiSample {
    pub hr: u32,
    pub pp_in_ms: u32,
    pub pp_error_estimate: u32,
    pub blocker_bit: bool,
    pub skin_contact_status: bool,
    pub skin_contact_supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PpiData {
    pub timestamp: u64,
    pub samples: Vec<PpiSample>,
}

// Offline recording

/// What an H10 stores while recording offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Hr,
    Rr,
}

impl SampleType {
    /// Only the exact string `"hr"` selects heart rate; everything else records RR intervals
    pub fn from_host(sample_type: &str) -> Self {
        if sample_type == "hr" {
            Self::Hr
        } else {
            Self::Rr
        }
    }
}

/// H10 sample interval. The bridge always records at one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingInterval {
    Interval1s,
}

impl RecordingInterval {
    pub fn seconds(self) -> u32 {
        match self {
            Self::Interval1s => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingStatus {
    pub ongoing: bool,
    pub entry_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseEntry {
    pub id: String,
    pub path: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExerciseData {
    pub recording_interval: u32,
    pub hr_samples: Vec<u32>,
}
