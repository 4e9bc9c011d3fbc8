//! Bridge between a Polar BLE sensor SDK and a host application.
//!
//! The host issues [`BridgeCommand`]s through a [`BridgeHandle`] and receives
//! [`BridgeEvent`]s back. All bridge state lives on one worker thread.

pub mod domain;
pub mod infrastructure;

pub use domain::commands::BridgeCommand;
pub use domain::events::BridgeEvent;
pub use domain::settings::{BridgeSettings, LogSettings, Settings, SettingsService};
pub use infrastructure::bridge::{BridgeClosed, BridgeHandle};
pub use infrastructure::sdk::{SdkCallback, SdkError, SdkResult, SensorSdk, SimulatedSdk};
