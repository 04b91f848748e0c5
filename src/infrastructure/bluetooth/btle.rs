//! BLE transport on top of btleplug.
//!
//! Handles discovery of the lamp by address, GATT characteristic lookup,
//! notification forwarding and frame writes.

use crate::domain::models::DeviceAddress;
use crate::error::{LampError, Result};
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame};
use crate::infrastructure::bluetooth::transport::{
    BlePeripheral, BleTransport, NotificationHandler,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the peripheral list is re-checked while scanning
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn transport_err(context: &str, e: btleplug::Error) -> LampError {
    LampError::Transport(format!("{}: {}", context, e))
}

/// Characteristic UUIDs used by the lamp
#[derive(Debug, Clone, Copy)]
pub struct LampCharacteristics {
    pub notify: Uuid,
    pub control: Uuid,
}

impl LampCharacteristics {
    pub fn from_strings(notify: &str, control: &str) -> Result<Self> {
        Ok(Self {
            notify: protocol::parse_uuid(notify)?,
            control: protocol::parse_uuid(control)?,
        })
    }
}

/// Transport bound to the first Bluetooth adapter on the host
pub struct BtleTransport {
    adapter: Adapter,
    characteristics: LampCharacteristics,
}

impl BtleTransport {
    pub async fn new(characteristics: LampCharacteristics) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| transport_err("Bluetooth manager unavailable", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| transport_err("Listing adapters failed", e))?
            .into_iter()
            .next()
            .ok_or_else(|| LampError::Transport("No Bluetooth adapters found".into()))?;

        match adapter.adapter_info().await {
            Ok(name) => info!("Using Bluetooth adapter {}", name),
            Err(e) => warn!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            adapter,
            characteristics,
        })
    }

    /// Poll the adapter's peripheral list until `address` shows up or `wait` runs out
    async fn poll_for(
        &self,
        address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<Peripheral>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(peripheral) = self.find_peripheral(address).await? {
                return Ok(Some(peripheral));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Option<Peripheral>> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| transport_err("Listing peripherals failed", e))?;
        Ok(peripherals
            .into_iter()
            .find(|p| address.matches(&p.address().to_string())))
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    type Peripheral = BtlePeripheral;

    async fn find_device(
        &self,
        address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<BtlePeripheral>> {
        info!("Starting BLE scan for {}", address);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| transport_err("Starting scan failed", e))?;

        let scan = ActiveScan::new(&self.adapter);
        let found = self.poll_for(address, wait).await;
        scan.stop().await;

        let found = found?;
        if found.is_none() {
            debug!("{} not seen within {:?}", address, wait);
        }
        Ok(found.map(|peripheral| BtlePeripheral {
            peripheral,
            characteristics: self.characteristics,
            control: None,
            notify: None,
            listener: None,
        }))
    }
}

/// A running adapter scan. Stopped explicitly once discovery finishes, or
/// from `Drop` when the discovery future is cancelled midway.
struct ActiveScan {
    adapter: Option<Adapter>,
}

impl ActiveScan {
    fn new(adapter: &Adapter) -> Self {
        Self {
            adapter: Some(adapter.clone()),
        }
    }

    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            stop_scan(adapter).await;
        }
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(stop_scan(adapter));
            }
            Err(_) => warn!("Discovery abandoned outside a runtime, scan left running"),
        }
    }
}

async fn stop_scan(adapter: Adapter) {
    if let Err(e) = adapter.stop_scan().await {
        warn!("Stopping scan failed: {}", e);
    }
}

/// A discovered lamp and its resolved characteristics
pub struct BtlePeripheral {
    peripheral: Peripheral,
    characteristics: LampCharacteristics,
    control: Option<Characteristic>,
    notify: Option<Characteristic>,
    listener: Option<JoinHandle<()>>,
}

impl BtlePeripheral {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| LampError::Transport(format!("Characteristic {} not found", uuid)))
    }
}

#[async_trait]
impl BlePeripheral for BtlePeripheral {
    async fn connect(&mut self) -> Result<()> {
        self.peripheral
            .connect()
            .await
            .map_err(|e| transport_err("Connect failed", e))?;
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| transport_err("Service discovery failed", e))?;

        self.control = Some(self.characteristic(self.characteristics.control)?);
        self.notify = Some(self.characteristic(self.characteristics.notify)?);
        debug!("Found control and notify characteristics");
        Ok(())
    }

    async fn subscribe(&mut self, handler: NotificationHandler) -> Result<()> {
        let notify = self
            .notify
            .clone()
            .ok_or_else(|| LampError::Transport("Not connected".into()))?;

        self.peripheral
            .subscribe(&notify)
            .await
            .map_err(|e| transport_err("Subscribe failed", e))?;
        let mut stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| transport_err("Notification stream unavailable", e))?;

        let notify_uuid = notify.uuid;
        if let Some(previous) = self.listener.take() {
            previous.abort();
        }
        self.listener = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == notify_uuid {
                    handler(notification.value.as_slice());
                }
            }
            debug!("Notification stream ended");
        }));
        Ok(())
    }

    async fn write(&mut self, frame: &CommandFrame) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| LampError::Transport("Not connected".into()))?;
        let write_type = if control.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(control, frame, write_type)
            .await
            .map_err(|e| transport_err("Write failed", e))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.control = None;
        self.notify = None;

        let connected = self.peripheral.is_connected().await.unwrap_or(false);
        if connected {
            self.peripheral
                .disconnect()
                .await
                .map_err(|e| transport_err("Disconnect failed", e))?;
        }
        Ok(())
    }
}

impl Drop for BtlePeripheral {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
