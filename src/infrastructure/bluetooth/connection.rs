//! BLE Connection Module
//!
//! Owns the link to the lamp: discovery, connect, notification subscription,
//! the one-time pairing handshake, bounded retries and disconnect.

use crate::domain::models::{DeviceAddress, LinkPhase, StateUpdate};
use crate::domain::state::SharedDeviceState;
use crate::error::{LampError, Result};
use crate::infrastructure::bluetooth::protocol::{self, LampCommand};
use crate::infrastructure::bluetooth::transport::{
    BlePeripheral, BleTransport, NotificationHandler,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Extra time a transport gets past `discovery_timeout` to stop its scan
/// before discovery is abandoned
pub const DISCOVERY_GRACE: Duration = Duration::from_secs(1);

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Total connection attempts before giving up
    pub max_attempts: u32,
    /// How long discovery waits for the lamp to advertise
    pub discovery_timeout: Duration,
    /// Bound on connect, subscribe and each write
    pub operation_timeout: Duration,
    /// Pause between failed attempts (zero retries immediately)
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            discovery_timeout: Duration::from_secs(20),
            operation_timeout: Duration::from_secs(10),
            retry_delay: Duration::ZERO,
        }
    }
}

/// An open link to the lamp
struct LinkSession<P> {
    peripheral: P,
}

/// Link lifecycle owner. The only component that opens or closes the transport.
pub struct LinkManager<T: BleTransport> {
    transport: T,
    address: DeviceAddress,
    config: ConnectionConfig,
    state: SharedDeviceState,
    updates: mpsc::UnboundedSender<StateUpdate>,
    session: Option<LinkSession<T::Peripheral>>,
    phase: LinkPhase,
}

impl<T: BleTransport> LinkManager<T> {
    pub fn new(
        transport: T,
        address: DeviceAddress,
        config: ConnectionConfig,
        state: SharedDeviceState,
        updates: mpsc::UnboundedSender<StateUpdate>,
    ) -> Self {
        Self {
            transport,
            address,
            config,
            state,
            updates,
            session: None,
            phase: LinkPhase::Idle,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_some() && self.phase.is_ready()
    }

    /// Connect unless a ready session already exists
    pub async fn ensure_ready(&mut self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.connect().await
    }

    /// Establish a fresh link, retrying up to `max_attempts` times
    pub async fn connect(&mut self) -> Result<()> {
        if let Err(e) = self.close_session().await {
            warn!("Failed to close previous session: {}", e);
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = LampError::Transport("no connection attempt made".into());

        for attempt in 1..=max_attempts {
            match self.attempt(attempt, max_attempts).await {
                Ok(peripheral) => {
                    self.session = Some(LinkSession { peripheral });
                    self.set_phase(LinkPhase::Ready);
                    info!("Connected to lamp {}", self.address);
                    return Ok(());
                }
                Err(e) => {
                    error!("Connection attempt {} failed: {}", attempt, e);
                    self.set_phase(LinkPhase::Disconnected);
                    last_error = e;
                    if attempt < max_attempts && !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.set_phase(LinkPhase::Failed);
        Err(LampError::LinkExhausted {
            attempts: max_attempts,
            source: Box::new(last_error),
        })
    }

    /// One pass of scan, connect, subscribe and (first time only) pair.
    /// Whatever was opened is closed again on failure.
    async fn attempt(&mut self, attempt: u32, max_attempts: u32) -> Result<T::Peripheral> {
        self.set_phase(LinkPhase::Scanning);
        debug!("Scanning for device {}...", self.address);

        // the transport honours `wait` itself and cleans up its scan; the
        // outer bound only catches a transport that stalls
        let wait = self.config.discovery_timeout;
        let found = match tokio::time::timeout(
            wait + DISCOVERY_GRACE,
            self.transport.find_device(&self.address, wait),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Discovery did not return within {:?}", wait + DISCOVERY_GRACE);
                None
            }
        };
        let mut peripheral =
            found.ok_or_else(|| LampError::DeviceNotFound(self.address.to_string()))?;

        debug!(
            "Device found. Attempting to connect... (Attempt {}/{})",
            attempt, max_attempts
        );

        match self.establish(&mut peripheral).await {
            Ok(()) => Ok(peripheral),
            Err(e) => {
                if let Err(close_err) = peripheral.disconnect().await {
                    warn!("Cleanup after failed attempt also failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn establish(&mut self, peripheral: &mut T::Peripheral) -> Result<()> {
        let limit = self.config.operation_timeout;

        self.set_phase(LinkPhase::Connecting);
        bounded(limit, "connect", peripheral.connect()).await?;

        self.set_phase(LinkPhase::Subscribing);
        debug!("Connected. Starting notification...");
        let handler = notification_handler(self.updates.clone());
        bounded(limit, "subscribe", peripheral.subscribe(handler)).await?;

        if !self.state.is_paired() {
            self.set_phase(LinkPhase::Pairing);
            info!("Initiating pairing...");
            bounded(limit, "pair", peripheral.write(&LampCommand::Pair.frame())).await?;
            self.state.mark_paired();
        }

        Ok(())
    }

    /// Write one command on the ready link.
    ///
    /// A failed write is returned as-is and tears the session down so the
    /// next operation reconnects.
    pub async fn send(&mut self, command: LampCommand) -> Result<()> {
        let limit = self.config.operation_timeout;
        let ready = self.phase.is_ready();
        let session = match self.session.as_mut() {
            Some(session) if ready => session,
            _ => return Err(LampError::Transport("link is not ready".into())),
        };

        let frame = command.frame();
        match bounded(limit, "write", session.peripheral.write(&frame)).await {
            Ok(()) => {
                debug!("{:?} command sent", command);
                Ok(())
            }
            Err(e) => {
                warn!("Sending {:?} failed, dropping link: {}", command, e);
                if let Err(close_err) = self.close_session().await {
                    debug!("Close after failed send: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Close the link. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        let result = self.close_session().await;
        info!("Disconnected from lamp {}", self.address);
        result
    }

    async fn close_session(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.set_phase(LinkPhase::Disconnected);
        session.peripheral.disconnect().await
    }

    fn set_phase(&mut self, phase: LinkPhase) {
        if self.phase != phase {
            debug!("Link {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

/// Decode every notification and forward state updates to the mirror
fn notification_handler(updates: mpsc::UnboundedSender<StateUpdate>) -> NotificationHandler {
    Arc::new(move |bytes: &[u8]| {
        debug!("Received: {:02x?}", bytes);
        if let Some(update) = protocol::decode_notification(bytes) {
            let _ = updates.send(update);
        }
    })
}

async fn bounded<F>(limit: Duration, step: &str, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LampError::Transport(format!(
            "{} timed out after {:?}",
            step, limit
        ))),
    }
}
