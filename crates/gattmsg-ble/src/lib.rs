//! Radio adapters for GattMsg
//!
//! Each adapter runs on its own task, consumes the commands a role manager
//! dispatches and answers with transport events. Pair them with the actors in
//! `gattmsg-core`:
//!
//! ```rust,no_run
//! use gattmsg_ble::{spawn_central_adapter, BleConfig};
//! use gattmsg_core::{observer_channel, spawn_central, CentralConfig, ServiceDescriptor};
//!
//! # async fn example() {
//! let (commands, events) = spawn_central_adapter(BleConfig::default());
//! let (observer_tx, _observer_rx) = observer_channel();
//! let (central, _task) = spawn_central(
//!     CentralConfig::default(),
//!     ServiceDescriptor::default(),
//!     commands,
//!     events,
//!     observer_tx,
//! );
//! central.start_scan().ok();
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Central role**: every platform btleplug supports
//! - **Peripheral role**: Linux via `bluer` and BlueZ. Elsewhere the adapter
//!   reports the radio as unsupported.

mod central;
mod config;
mod error;
mod peripheral;

pub use central::spawn_central_adapter;
pub use config::BleConfig;
pub use error::{BleError, Result};
pub use peripheral::{run_peripheral_adapter, spawn_peripheral_adapter, GattServer};
