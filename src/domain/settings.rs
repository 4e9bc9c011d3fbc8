use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_false")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_false(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "polar_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Behavior switches for the bridge itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Only report Polar devices while scanning
    #[serde(default = "default_true")]
    pub polar_filter: bool,

    // Auto-connect defaults, used when the host omits them
    #[serde(default = "default_auto_connect_device_type")]
    pub auto_connect_device_type: String,
    #[serde(default = "default_auto_connect_rssi")]
    pub auto_connect_rssi: i32,

    /// Emit accelerometer samples as `{x, y: z}` without a `z` field, like the
    /// first released mobile module did
    #[serde(default = "default_false")]
    pub legacy_acc_layout: bool,

    /// Report SDK failures to the host as `ERROR` events instead of logging only
    #[serde(default = "default_false")]
    pub emit_error_events: bool,

    // Pacing of the synthetic frames produced by the simulated SDK
    #[serde(default = "default_simulated_frame_interval_ms")]
    pub simulated_frame_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            polar_filter: default_true(),
            auto_connect_device_type: default_auto_connect_device_type(),
            auto_connect_rssi: default_auto_connect_rssi(),
            legacy_acc_layout: default_false(),
            emit_error_events: default_false(),
            simulated_frame_interval_ms: default_simulated_frame_interval_ms(),
        }
    }
}

fn default_auto_connect_device_type() -> String {
    "H10".to_string()
}
fn default_auto_connect_rssi() -> i32 {
    -55
}
fn default_simulated_frame_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Bridge Settings
    #[serde(default)]
    pub bridge: BridgeSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the per-user config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load_from(settings_path))
    }

    /// Load settings from an explicit path; a missing or unreadable file yields defaults
    pub fn load_from(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PolarBleBridge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
