use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
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
    #[serde(default = "default_true")]
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
            ansi_colors: default_true(),
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
    "lampd".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Lamp
    #[serde(default = "default_device_address")]
    pub device_address: String,
    #[serde(default = "default_notify_uuid")]
    pub notify_char_uuid: String,
    #[serde(default = "default_control_uuid")]
    pub control_char_uuid: String,

    // Link behaviour
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_false")]
    pub connect_on_startup: bool,

    // HTTP surface
    #[serde(default = "default_http_bind_address")]
    pub http_bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            notify_char_uuid: default_notify_uuid(),
            control_char_uuid: default_control_uuid(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            max_connect_attempts: default_max_connect_attempts(),
            retry_delay_ms: 0,
            operation_timeout_ms: default_operation_timeout_ms(),
            connect_on_startup: false,
            http_bind_address: default_http_bind_address(),
            http_port: default_http_port(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_attempts: self.max_connect_attempts,
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

fn default_device_address() -> String {
    "f8:24:41:e4:62:9f".to_string()
}
fn default_notify_uuid() -> String {
    protocol::NOTIFY_CHAR_UUID.to_string()
}
fn default_control_uuid() -> String {
    protocol::CONTROL_CHAR_UUID.to_string()
}
fn default_discovery_timeout_secs() -> u64 {
    20
}
fn default_max_connect_attempts() -> u32 {
    3
}
fn default_operation_timeout_ms() -> u64 {
    10_000
}
fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    9090
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or invalid
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!(
                        "Ignoring unreadable settings {}: {}",
                        settings_path.display(),
                        e
                    );
                }
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
        path.push("BedsideLampBridge");
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
