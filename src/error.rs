//! Error types shared by the lamp core.

use thiserror::Error;

/// Errors surfaced by the link, codec and controller layers.
#[derive(Error, Debug)]
pub enum LampError {
    /// Discovery ran out of time without seeing the device
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// Connect, subscribe or write failed at the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every connection attempt failed; carries the last cause
    #[error("Could not establish link after {attempts} attempt(s): {source}")]
    LinkExhausted {
        attempts: u32,
        #[source]
        source: Box<LampError>,
    },

    /// Caller-supplied value outside a fixed enumeration
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl LampError {
    /// True for failures that happened while establishing the link, as
    /// opposed to a command send on an already-open link.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            LampError::DeviceNotFound(_) | LampError::LinkExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LampError>;
