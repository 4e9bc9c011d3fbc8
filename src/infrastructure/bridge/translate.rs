//! SDK data → host payloads
//!
//! Pure conversions from SDK frames into the payloads the host receives.
//! Timestamps pass through untouched (sensor-epoch nanoseconds).

use crate::domain::events::{
    AccPayload, AccSamplePayload, EcgPayload, EcgSamplePayload, ExerciseEntryPayload, HrPayload,
    PpgPayload, PpgSamplePayload, PpiPayload, PpiSamplePayload, ReadExercisePayload,
    RecordStatusPayload,
};
use crate::domain::models::{
    AccData, EcgData, ExerciseData, ExerciseEntry, HrData, PpgData, PpiData, RecordingStatus,
};
use tracing::trace;

/// Layout of accelerometer samples on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccLayout {
    /// `{x, y, z}`
    #[default]
    Standard,
    /// `{x, y: z}` with no `z` field, as the first released mobile module sent it
    Legacy,
}

impl AccLayout {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            Self::Legacy
        } else {
            Self::Standard
        }
    }
}

/// Heart rate payloads carry only the first sample of a frame; an empty frame yields none
pub fn hr_payload(id: &str, data: &HrData) -> Option<HrPayload> {
    let sample = data.samples.first()?;
    if data.samples.len() > 1 {
        trace!("Dropping {} extra HR samples in frame", data.samples.len() - 1);
    }
    Some(HrPayload {
        id: id.to_string(),
        hr: sample.hr,
        rrs_ms: sample.rrs_ms.clone(),
        rr_available: sample.rr_available,
        contact_status: sample.contact_status,
        contact_status_supported: sample.contact_status_supported,
    })
}

pub fn ecg_payload(id: &str, data: &EcgData) -> EcgPayload {
    EcgPayload {
        id: id.to_string(),
        samples: data
            .samples
            .iter()
            .map(|s| EcgSamplePayload {
                time_stamp: s.timestamp,
                voltage: s.voltage,
            })
            .collect(),
    }
}

pub fn acc_payload(id: &str, data: &AccData, layout: AccLayout) -> AccPayload {
    AccPayload {
        id: id.to_string(),
        samples: data
            .samples
            .iter()
            .map(|s| match layout {
                AccLayout::Standard => AccSamplePayload {
                    time_stamp: s.timestamp,
                    x: s.x,
                    y: s.y,
                    z: Some(s.z),
                },
                AccLayout::Legacy => AccSamplePayload {
                    time_stamp: s.timestamp,
                    x: s.x,
                    y: s.z,
                    z: None,
                },
            })
            .collect(),
    }
}

/// Channels beyond the fourth are ignored, missing ones read as zero
pub fn ppg_payload(id: &str, data: &PpgData) -> PpgPayload {
    PpgPayload {
        id: id.to_string(),
        samples: data
            .samples
            .iter()
            .map(|s| {
                let channel = |i: usize| s.channel_samples.get(i).copied().unwrap_or(0);
                PpgSamplePayload {
                    time_stamp: s.timestamp,
                    ppg0: channel(0),
                    ppg1: channel(1),
                    ppg2: channel(2),
                    ambient: channel(3),
                }
            })
            .collect(),
    }
}

pub fn ppi_payload(id: &str, data: &PpiData) -> PpiPayload {
    PpiPayload {
        id: id.to_string(),
        time_stamp: data.timestamp,
        samples: data
            .samples
            .iter()
            .map(|s| PpiSamplePayload {
                hr: s.hr,
                pp_in_ms: s.pp_in_ms,
                pp_error_estimate: s.pp_error_estimate,
                blocker_bit: s.blocker_bit,
                skin_contact_status: s.skin_contact_status,
                skin_contact_supported: s.skin_contact_supported,
            })
            .collect(),
    }
}

pub fn record_status_payload(status: &RecordingStatus) -> RecordStatusPayload {
    RecordStatusPayload {
        ongoing: status.ongoing,
        entry_id: status.entry_id.clone(),
    }
}

pub fn exercise_entry_payload(entry: &ExerciseEntry) -> ExerciseEntryPayload {
    ExerciseEntryPayload {
        id: entry.id.clone(),
        path: entry.path.clone(),
        date: entry.date.to_string(),
    }
}

pub fn read_exercise_payload(data: &ExerciseData) -> ReadExercisePayload {
    ReadExercisePayload {
        interval: data.recording_interval,
        samples: data.hr_samples.clone(),
    }
}
