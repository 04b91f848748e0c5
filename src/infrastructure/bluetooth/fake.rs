//! In-memory transport used by the link and controller tests.

use crate::domain::models::DeviceAddress;
use crate::error::{LampError, Result};
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use crate::infrastructure::bluetooth::transport::{
    BlePeripheral, BleTransport, NotificationHandler,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scan does when the lamp is scripted as absent
#[derive(Clone, Copy, Default)]
enum AbsentScan {
    /// Report `None` straight away
    #[default]
    Immediate,
    /// Keep scanning until the wait runs out, then stop the scan
    UntilDeadline,
    /// Never return
    Hang,
}

#[derive(Default)]
struct Script {
    discoveries: u32,
    scans_stopped: u32,
    absent_scan: AbsentScan,
    connects: u32,
    disconnects: u32,
    // remaining failures per step; u32::MAX fails forever
    discovery_failures: u32,
    connect_failures: u32,
    subscribe_failures: u32,
    write_failures: u32,
    hang_on_connect: bool,
    written: Vec<CommandFrame>,
    handler: Option<NotificationHandler>,
}

fn take_failure(remaining: &mut u32) -> bool {
    match *remaining {
        0 => false,
        u32::MAX => true,
        _ => {
            *remaining -= 1;
            true
        }
    }
}

/// Scripted lamp shared between the transport and the test body
#[derive(Clone, Default)]
pub struct FakeLamp {
    script: Arc<Mutex<Script>>,
}

impl FakeLamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> FakeTransport {
        FakeTransport { lamp: self.clone() }
    }

    pub fn fail_discoveries(&self, count: u32) {
        self.script.lock().unwrap().discovery_failures = count;
    }

    pub fn fail_connects(&self, count: u32) {
        self.script.lock().unwrap().connect_failures = count;
    }

    pub fn fail_subscribes(&self, count: u32) {
        self.script.lock().unwrap().subscribe_failures = count;
    }

    pub fn fail_writes(&self, count: u32) {
        self.script.lock().unwrap().write_failures = count;
    }

    /// Absent-lamp scans run for the full wait, like a real adapter
    pub fn scan_until_deadline(&self) {
        self.script.lock().unwrap().absent_scan = AbsentScan::UntilDeadline;
    }

    /// Absent-lamp scans never return
    pub fn hang_on_scan(&self) {
        self.script.lock().unwrap().absent_scan = AbsentScan::Hang;
    }

    pub fn hang_on_connect(&self) {
        self.script.lock().unwrap().hang_on_connect = true;
    }

    pub fn discoveries(&self) -> u32 {
        self.script.lock().unwrap().discoveries
    }

    /// Scans that finished and released the adapter
    pub fn scans_stopped(&self) -> u32 {
        self.script.lock().unwrap().scans_stopped
    }

    pub fn connects(&self) -> u32 {
        self.script.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.script.lock().unwrap().disconnects
    }

    pub fn written(&self) -> Vec<CommandFrame> {
        self.script.lock().unwrap().written.clone()
    }

    /// Frames written with the given opcode byte
    pub fn written_with_opcode(&self, opcode: u8) -> Vec<CommandFrame> {
        self.written()
            .into_iter()
            .filter(|frame| frame[1] == opcode)
            .collect()
    }

    /// Push raw bytes through the registered notification handler
    pub fn notify(&self, bytes: &[u8]) {
        let handler = self.script.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            handler(bytes);
        }
    }
}

pub struct FakeTransport {
    lamp: FakeLamp,
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Peripheral = FakePeripheral;

    async fn find_device(
        &self,
        _address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<FakePeripheral>> {
        let (absent, mode) = {
            let mut script = self.lamp.script.lock().unwrap();
            script.discoveries += 1;
            (
                take_failure(&mut script.discovery_failures),
                script.absent_scan,
            )
        };

        if absent {
            match mode {
                AbsentScan::Immediate => {}
                AbsentScan::UntilDeadline => tokio::time::sleep(wait).await,
                AbsentScan::Hang => std::future::pending::<()>().await,
            }
        }
        self.lamp.script.lock().unwrap().scans_stopped += 1;

        if absent {
            return Ok(None);
        }
        Ok(Some(FakePeripheral {
            lamp: self.lamp.clone(),
        }))
    }
}

pub struct FakePeripheral {
    lamp: FakeLamp,
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    async fn connect(&mut self) -> Result<()> {
        let hang = {
            let mut script = self.lamp.script.lock().unwrap();
            script.connects += 1;
            if take_failure(&mut script.connect_failures) {
                return Err(LampError::Transport("connect refused".into()));
            }
            script.hang_on_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn subscribe(&mut self, handler: NotificationHandler) -> Result<()> {
        let mut script = self.lamp.script.lock().unwrap();
        if take_failure(&mut script.subscribe_failures) {
            return Err(LampError::Transport("subscribe failed".into()));
        }
        script.handler = Some(handler);
        Ok(())
    }

    async fn write(&mut self, frame: &CommandFrame) -> Result<()> {
        let mut script = self.lamp.script.lock().unwrap();
        if take_failure(&mut script.write_failures) {
            return Err(LampError::Transport("write failed".into()));
        }
        script.written.push(*frame);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut script = self.lamp.script.lock().unwrap();
        script.disconnects += 1;
        script.handler = None;
        Ok(())
    }
}
