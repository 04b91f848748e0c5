//! Lamp operations.
//!
//! Every operation takes the link lock, makes sure the link is ready
//! (connecting with retries if needed) and sends exactly one command frame.
//! Holding the lock across the send serializes concurrent callers onto the
//! single BLE link.

use crate::domain::models::{DeviceAddress, LampStatus, LinkPhase, BRIGHTNESS_STEP};
use crate::domain::state::{self, DeviceState, SharedDeviceState};
use crate::error::Result;
use crate::infrastructure::bluetooth::connection::{ConnectionConfig, LinkManager};
use crate::infrastructure::bluetooth::protocol::LampCommand;
use crate::infrastructure::bluetooth::transport::BleTransport;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct LampController<T: BleTransport> {
    link: Mutex<LinkManager<T>>,
    state: SharedDeviceState,
    updater: JoinHandle<()>,
}

impl<T: BleTransport> LampController<T> {
    /// Build a controller and spawn the task that applies notifications to
    /// the state mirror. Must be called inside a tokio runtime.
    pub fn new(transport: T, address: DeviceAddress, config: ConnectionConfig) -> Self {
        let state = DeviceState::shared();
        let (tx, rx) = mpsc::unbounded_channel();
        let updater = tokio::spawn(state::apply_updates(rx, state.clone()));
        let link = LinkManager::new(transport, address, config, state.clone(), tx);

        Self {
            link: Mutex::new(link),
            state,
            updater,
        }
    }

    /// Current mirror, without touching the link
    pub fn state(&self) -> LampStatus {
        self.state.snapshot()
    }

    pub async fn phase(&self) -> LinkPhase {
        self.link.lock().await.phase()
    }

    /// Connect now instead of on first use
    pub async fn connect(&self) -> Result<()> {
        self.link.lock().await.ensure_ready().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.link.lock().await.disconnect().await
    }

    async fn ready_link(&self) -> Result<MutexGuard<'_, LinkManager<T>>> {
        let mut link = self.link.lock().await;
        link.ensure_ready().await?;
        Ok(link)
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.ready_link().await?.send(LampCommand::PowerOn).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.ready_link().await?.send(LampCommand::PowerOff).await
    }

    /// Ask the lamp for its state and return the mirror as it is right now.
    /// The answer arrives later as a notification.
    pub async fn get_status(&self) -> Result<LampStatus> {
        self.ready_link().await?.send(LampCommand::GetState).await?;
        Ok(self.state.snapshot())
    }

    /// Returns the brightness actually sent after clamping
    pub async fn set_brightness(&self, requested: i64) -> Result<u8> {
        let mut link = self.ready_link().await?;
        self.send_brightness(&mut link, requested).await
    }

    pub async fn increase_brightness(&self) -> Result<u8> {
        self.nudge_brightness(BRIGHTNESS_STEP).await
    }

    pub async fn decrease_brightness(&self) -> Result<u8> {
        self.nudge_brightness(-BRIGHTNESS_STEP).await
    }

    async fn nudge_brightness(&self, delta: i64) -> Result<u8> {
        let mut link = self.ready_link().await?;
        // read under the link lock so concurrent nudges compose
        let current = i64::from(self.state.brightness());
        self.send_brightness(&mut link, current + delta).await
    }

    async fn send_brightness(&self, link: &mut LinkManager<T>, requested: i64) -> Result<u8> {
        let command = LampCommand::brightness(requested);
        let brightness = command.value();
        link.send(command).await?;
        self.state.set_brightness(brightness);
        debug!("Set brightness command sent: {}", brightness);
        Ok(brightness)
    }
}

impl<T: BleTransport> Drop for LampController<T> {
    fn drop(&mut self) {
        self.updater.abort();
    }
}
