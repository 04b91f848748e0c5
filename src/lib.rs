//! Bridge between a Bluetooth LE bedside lamp and a small HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            presentation::http                 │
//! │   (GET /on, /off, /status, /brightness, ...)  │
//! └──────────────────────┬────────────────────────┘
//!                        ▼
//! ┌───────────────────────────────────────────────┐
//! │               LampController                  │
//! │  (serializes operations, optimistic updates)  │
//! └──────┬─────────────────┬──────────────────────┘
//!        ▼                 ▼
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ LinkManager │──▶│  Transport  │   │ Protocol │
//! │ - retries   │   │ - btleplug  │   │ - frames │
//! │ - pairing   │   │ - notify    │   │ - decode │
//! └─────────────┘   └──────┬──────┘   └──────────┘
//!                          ▼ StateUpdate channel
//!                   ┌─────────────┐
//!                   │ DeviceState │
//!                   └─────────────┘
//! ```

pub mod controller;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use controller::LampController;
pub use domain::models::{DeviceAddress, LampStatus, LinkPhase, StateUpdate};
pub use error::{LampError, Result};
