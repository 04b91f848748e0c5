//! Bedside Lamp Protocol
//!
//! Frame layouts and command definitions for talking to the lamp over its
//! control and notify characteristics.

use crate::domain::models::{clamp_brightness, StateUpdate};
use crate::error::LampError;
use tracing::trace;
use uuid::Uuid;

/// Notify characteristic - where state responses arrive
pub const NOTIFY_CHAR_UUID: &str = "8f65073d-9f57-4aaa-afea-397d19d5bbeb";

/// Control characteristic - where command frames are written
pub const CONTROL_CHAR_UUID: &str = "aa7d3f34-2d4f-41e0-807f-52fbf8cf7443";

/// First byte of every outbound frame
pub const COMMAND_STX: u8 = 0x43;

/// Outbound frames are always this long
pub const COMMAND_FRAME_LEN: usize = 18;

/// Opcode carried by state response notifications
pub const RES_GETSTATE: u8 = 0x45;

/// Length of a state response as sent by the lamp
pub const STATE_FRAME_LEN: usize = 18;

pub type CommandFrame = [u8; COMMAND_FRAME_LEN];

/// Command opcodes understood by the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Power,
    Brightness,
    GetState,
    Pair,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Power => 0x40,
            Self::Brightness => 0x42,
            Self::GetState => 0x44,
            Self::Pair => 0x67,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = LampError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x40 => Ok(Self::Power),
            0x42 => Ok(Self::Brightness),
            0x44 => Ok(Self::GetState),
            0x67 => Ok(Self::Pair),
            other => Err(LampError::InvalidParameter(format!(
                "unknown opcode {:#04X}",
                other
            ))),
        }
    }
}

/// Commands sent to the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampCommand {
    /// One-time handshake after the first connect
    Pair,
    PowerOn,
    PowerOff,
    /// Ask the lamp to push a state notification
    GetState,
    /// Brightness, already clamped to 1..=100
    SetBrightness(u8),
}

impl LampCommand {
    /// Build a brightness command, clamping the requested level
    pub fn brightness(requested: i64) -> Self {
        Self::SetBrightness(clamp_brightness(requested))
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Pair => Opcode::Pair,
            Self::PowerOn | Self::PowerOff => Opcode::Power,
            Self::GetState => Opcode::GetState,
            Self::SetBrightness(_) => Opcode::Brightness,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            Self::Pair => 0x02,
            Self::PowerOn => 0x01,
            Self::PowerOff => 0x02,
            Self::GetState => 0x02,
            Self::SetBrightness(level) => clamp_brightness((*level).into()),
        }
    }

    pub fn frame(&self) -> CommandFrame {
        encode_command(self.opcode(), self.value())
    }
}

/// Build an outbound command frame
///
/// # Frame Structure (18 bytes)
///
/// ```text
/// [0]     : Start marker (0x43)
/// [1]     : Opcode
/// [2]     : Value / parameter
/// [3-17]  : Zero padding
/// ```
pub fn encode_command(opcode: Opcode, value: u8) -> CommandFrame {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[0] = COMMAND_STX;
    frame[1] = opcode.as_byte();
    frame[2] = value;
    frame
}

/// Decode a notification from the lamp
///
/// Only state responses (`bytes[1] == 0x45`) carry anything useful; every
/// other frame yields `None`.
///
/// # State Response Structure (18 bytes, big-endian)
///
/// ```text
/// [0-1]   : Skipped (marker, opcode)
/// [2-8]   : Seven u8 fields
///           field 0 (byte 2): power, 0x01 = on
///           field 6 (byte 8): brightness
/// [9-10]  : i16, meaning unknown, not decoded
/// [11-17] : Skipped
/// ```
pub fn decode_notification(bytes: &[u8]) -> Option<StateUpdate> {
    if bytes.len() < 2 || bytes[1] != RES_GETSTATE {
        return None;
    }

    if bytes.len() < STATE_FRAME_LEN {
        trace!("Truncated state response: {:02X?}", bytes);
        return None;
    }

    let fields = &bytes[2..9];

    Some(StateUpdate {
        is_on: fields[0] == LampCommand::PowerOn.value(),
        brightness: fields[6],
    })
}

/// Parse a characteristic UUID string
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, LampError> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| LampError::InvalidParameter(format!("invalid UUID {:?}: {}", uuid_str, e)))
}
