//! Bluetooth Module
//!
//! Provides BLE communication with the bedside lamp.
//!
//! ## Modules
//!
//! - [`protocol`] - Command frames, notification decoding, UUIDs
//! - [`transport`] - Traits a BLE stack implements for the link manager
//! - [`connection`] - Link lifecycle: discovery, connect, subscribe, pairing, retries
//! - `btle` - btleplug transport (feature `ble`)

pub mod connection;
pub mod protocol;
pub mod transport;

#[cfg(feature = "ble")]
pub mod btle;

#[cfg(test)]
pub(crate) mod fake;

pub use connection::{ConnectionConfig, LinkManager};
