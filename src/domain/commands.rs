//! Commands issued by the host.
//!
//! Each command is one-way: the bridge never answers a command directly, results
//! arrive later as [`BridgeEvent`](crate::domain::events::BridgeEvent)s.

use serde::{Deserialize, Serialize};

use crate::domain::models::StreamKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeCommand {
    SearchForDevice,
    ConnectToDevice {
        id: String,
    },
    DisconnectFromDevice {
        id: String,
    },
    StartAutoConnectToDevice {
        #[serde(default)]
        rssi: Option<i32>,
        #[serde(default)]
        device_type: Option<String>,
    },
    StartHrStreaming {
        id: String,
    },
    StopHrStreaming {
        id: String,
    },
    StartEcgStreaming {
        id: String,
    },
    StopEcgStreaming {
        id: String,
    },
    StartAccStreaming {
        id: String,
    },
    StopAccStreaming {
        id: String,
    },
    StartPpgStreaming {
        id: String,
    },
    StopPpgStreaming {
        id: String,
    },
    StartPpiStreaming {
        id: String,
    },
    StopPpiStreaming {
        id: String,
    },
    GetH10RecordingStatus {
        id: String,
    },
    StartH10Recording {
        id: String,
        exercise_id: String,
        sample_type: String,
    },
    StopH10Recording {
        id: String,
    },
    ListExercises {
        id: String,
    },
    ReadExercise {
        id: String,
        #[serde(default)]
        entry_id: Option<String>,
    },
    RemoveExercise {
        id: String,
        #[serde(default)]
        entry_id: Option<String>,
    },
    ForegroundEntered,
    Shutdown,
}

impl BridgeCommand {
    pub fn start_streaming(kind: StreamKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            StreamKind::Hr => Self::StartHrStreaming { id },
            StreamKind::Ecg => Self::StartEcgStreaming { id },
            StreamKind::Acc => Self::StartAccStreaming { id },
            StreamKind::Ppg => Self::StartPpgStreaming { id },
            StreamKind::Ppi => Self::StartPpiStreaming { id },
        }
    }

    pub fn stop_streaming(kind: StreamKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            StreamKind::Hr => Self::StopHrStreaming { id },
            StreamKind::Ecg => Self::StopEcgStreaming { id },
            StreamKind::Acc => Self::StopAccStreaming { id },
            StreamKind::Ppg => Self::StopPpgStreaming { id },
            StreamKind::Ppi => Self::StopPpiStreaming { id },
        }
    }

    /// Name used in logs and error events
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchForDevice => "searchForDevice",
            Self::ConnectToDevice { .. } => "connectToDevice",
            Self::DisconnectFromDevice { .. } => "disconnectFromDevice",
            Self::StartAutoConnectToDevice { .. } => "startAutoConnectToDevice",
            Self::StartHrStreaming { .. } => "startHrStreaming",
            Self::StopHrStreaming { .. } => "stopHrStreaming",
            Self::StartEcgStreaming { .. } => "startEcgStreaming",
            Self::StopEcgStreaming { .. } => "stopEcgStreaming",
            Self::StartAccStreaming { .. } => "startAccStreaming",
            Self::StopAccStreaming { .. } => "stopAccStreaming",
            Self::StartPpgStreaming { .. } => "startPpgStreaming",
            Self::StopPpgStreaming { .. } => "stopPpgStreaming",
            Self::StartPpiStreaming { .. } => "startPpiStreaming",
            Self::StopPpiStreaming { .. } => "stopPpiStreaming",
            Self::GetH10RecordingStatus { .. } => "getH10RecordingStatus",
            Self::StartH10Recording { .. } => "startH10Recording",
            Self::StopH10Recording { .. } => "stopH10Recording",
            Self::ListExercises { .. } => "listExercises",
            Self::ReadExercise { .. } => "readExercise",
            Self::RemoveExercise { .. } => "removeExercise",
            Self::ForegroundEntered => "foregroundEntered",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recording_command() {
        let cmd: BridgeCommand = serde_json::from_str(
            r#"{"command":"startH10Recording","id":"C1C6082D","exerciseId":"run-1","sampleType":"hr"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            BridgeCommand::StartH10Recording {
                id: "C1C6082D".to_string(),
                exercise_id: "run-1".to_string(),
                sample_type: "hr".to_string(),
            }
        );
        assert_eq!(cmd.name(), "startH10Recording");
    }

    #[test]
    fn test_parse_unit_and_optional_fields() {
        let cmd: BridgeCommand = serde_json::from_str(r#"{"command":"searchForDevice"}"#).unwrap();
        assert_eq!(cmd, BridgeCommand::SearchForDevice);

        let cmd: BridgeCommand =
            serde_json::from_str(r#"{"command":"readExercise","id":"C1C6082D"}"#).unwrap();
        assert_eq!(
            cmd,
            BridgeCommand::ReadExercise {
                id: "C1C6082D".to_string(),
                entry_id: None,
            }
        );

        let cmd: BridgeCommand = serde_json::from_str(
            r#"{"command":"removeExercise","id":"C1C6082D","entryId":"e-2"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            BridgeCommand::RemoveExercise {
                id: "C1C6082D".to_string(),
                entry_id: Some("e-2".to_string()),
            }
        );

        let cmd: BridgeCommand =
            serde_json::from_str(r#"{"command":"startAutoConnectToDevice","rssi":-55}"#).unwrap();
        assert_eq!(
            cmd,
            BridgeCommand::StartAutoConnectToDevice {
                rssi: Some(-55),
                device_type: None,
            }
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let result = serde_json::from_str::<BridgeCommand>(r#"{"command":"multiply","a":2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_streaming_constructors() {
        assert_eq!(
            BridgeCommand::start_streaming(StreamKind::Acc, "x"),
            BridgeCommand::StartAccStreaming { id: "x".to_string() }
        );
        assert_eq!(
            BridgeCommand::stop_streaming(StreamKind::Ppi, "x").name(),
            "stopPpiStreaming"
        );
    }
}
