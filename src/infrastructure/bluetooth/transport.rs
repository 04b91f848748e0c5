//! Transport seam between the link manager and a concrete BLE stack.

use crate::domain::models::DeviceAddress;
use crate::error::Result;
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Called with the raw bytes of every notification the lamp sends
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Finds lamps by address
#[async_trait]
pub trait BleTransport: Send + Sync {
    type Peripheral: BlePeripheral;

    /// Scan for `address` for at most `wait`. `Ok(None)` when it never showed up.
    /// Any scan started here is stopped before returning.
    async fn find_device(
        &self,
        address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<Self::Peripheral>>;
}

/// A discovered lamp
#[async_trait]
pub trait BlePeripheral: Send + Sync + 'static {
    async fn connect(&mut self) -> Result<()>;

    /// Enable notifications and route them to `handler`
    async fn subscribe(&mut self, handler: NotificationHandler) -> Result<()>;

    /// Write one frame to the control characteristic
    async fn write(&mut self, frame: &CommandFrame) -> Result<()>;

    /// Close the connection. Must be safe to call on a half-open peripheral.
    async fn disconnect(&mut self) -> Result<()>;
}
