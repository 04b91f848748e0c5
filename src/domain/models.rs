use crate::error::{LampError, Result};
use std::fmt;

pub const MIN_BRIGHTNESS: u8 = 1;
pub const MAX_BRIGHTNESS: u8 = 100;

/// Brightness change applied by a single up/down nudge
pub const BRIGHTNESS_STEP: i64 = 10;

/// Clamp a requested brightness into the range the lamp accepts
pub fn clamp_brightness(requested: i64) -> u8 {
    requested.clamp(MIN_BRIGHTNESS.into(), MAX_BRIGHTNESS.into()) as u8
}

/// Stable identifier of the target lamp (its Bluetooth MAC address)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(LampError::InvalidParameter(
                "Address must be provided".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an address reported by a scanner
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State decoded from a device notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
    pub is_on: bool,
    pub brightness: u8,
}

/// Snapshot of the local device mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampStatus {
    pub is_on: bool,
    pub brightness: u8,
    pub paired: bool,
}

impl Default for LampStatus {
    fn default() -> Self {
        Self {
            is_on: false,
            brightness: MIN_BRIGHTNESS,
            paired: false,
        }
    }
}

/// Link lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Scanning,
    Connecting,
    Subscribing,
    Pairing,
    Ready,
    Disconnected,
    Failed,
}

impl LinkPhase {
    pub fn is_ready(self) -> bool {
        self == LinkPhase::Ready
    }
}
