//! Local mirror of the lamp's last known state.
//!
//! Written optimistically by the controller right after a command goes out,
//! and authoritatively whenever a state notification is decoded. The pair
//! `{is_on, brightness}` is only ever touched under the lock.

use crate::domain::models::{clamp_brightness, LampStatus, StateUpdate};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type SharedDeviceState = Arc<DeviceState>;

#[derive(Debug, Default)]
pub struct DeviceState {
    inner: Mutex<LampStatus>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedDeviceState {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, LampStatus> {
        // A poisoned lock still holds a consistent Copy value
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> LampStatus {
        *self.lock()
    }

    pub fn brightness(&self) -> u8 {
        self.lock().brightness
    }

    pub fn is_paired(&self) -> bool {
        self.lock().paired
    }

    pub fn mark_paired(&self) {
        self.lock().paired = true;
    }

    /// Optimistic write after a brightness command was sent
    pub fn set_brightness(&self, brightness: u8) {
        let brightness = clamp_brightness(brightness.into());
        self.lock().brightness = brightness;
        debug!("Mirrored brightness set to {}", brightness);
    }

    /// Authoritative write from a decoded notification
    pub fn apply_update(&self, update: StateUpdate) {
        let mut status = self.lock();
        status.is_on = update.is_on;
        status.brightness = clamp_brightness(update.brightness.into());
        info!(
            "Lamp is {}, brightness: {}",
            if status.is_on { "ON" } else { "OFF" },
            status.brightness
        );
    }
}

/// Drain decoded notifications into the mirror until every sender is gone
pub async fn apply_updates(mut rx: mpsc::UnboundedReceiver<StateUpdate>, state: SharedDeviceState) {
    while let Some(update) = rx.recv().await {
        state.apply_update(update);
    }
    debug!("State update channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = DeviceState::new();
        assert_eq!(state.snapshot(), LampStatus::default());
        assert!(!state.is_paired());
    }

    #[test]
    fn test_authoritative_overwrites_optimistic() {
        let state = DeviceState::new();
        state.set_brightness(80);
        assert_eq!(state.brightness(), 80);

        state.apply_update(StateUpdate {
            is_on: true,
            brightness: 35,
        });
        let status = state.snapshot();
        assert!(status.is_on);
        assert_eq!(status.brightness, 35);
    }

    #[test]
    fn test_stored_brightness_is_clamped() {
        let state = DeviceState::new();
        state.apply_update(StateUpdate {
            is_on: false,
            brightness: 0,
        });
        assert_eq!(state.brightness(), 1);
        state.set_brightness(200);
        assert_eq!(state.brightness(), 100);
    }

    #[tokio::test]
    async fn test_apply_updates_drains_channel() {
        let state = DeviceState::shared();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StateUpdate {
            is_on: true,
            brightness: 10,
        })
        .unwrap();
        tx.send(StateUpdate {
            is_on: false,
            brightness: 60,
        })
        .unwrap();
        drop(tx);

        apply_updates(rx, state.clone()).await;
        assert_eq!(
            state.snapshot(),
            LampStatus {
                is_on: false,
                brightness: 60,
                paired: false,
            }
        );
    }
}
