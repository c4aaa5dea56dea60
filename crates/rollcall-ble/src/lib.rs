//! BLE presence protocol engine for classroom attendance
//!
//! A student device advertises a beacon naming its subject id; a fixed
//! receiver in the classroom records who is present. This crate provides the
//! device side: advertising the beacon, finding the receiver, and checking in.
//!
//! ## Architecture
//!
//! - [`PresenceEngine`] - Explicit engine instance driven by a presentation layer
//! - [`AdvertisingSession`] - Beacon lifecycle with an Active/Degraded split
//! - [`DiscoveryScanner`] - Bounded, deduplicated scan windows
//! - [`PermissionGate`] / [`RadioMonitor`] - Checks repeated before every radio operation
//! - [`RadioManager`] - Boundary to the radio stack ([`HostRadio`] on real hardware)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rollcall_ble::{BeaconIdentity, EngineConfig, HostRadio, PresenceEngine, SystemTimeSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let radio = Arc::new(HostRadio::new(config.connection_timeout()).await?);
//! let engine = PresenceEngine::new(radio, Arc::new(SystemTimeSource), config)?;
//!
//! let identity = BeaconIdentity::new("12345", "John Doe")?;
//! let mode = engine.start_advertising(identity).await?;
//! println!("Advertising in {:?} mode", mode);
//!
//! let receiver = engine.scan_for_receiver(None).await?;
//! println!("Receiver: {:?}", receiver.device());
//!
//! engine.stop_advertising().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: Peripheral advertising via `bluer` (BlueZ); scanning via `btleplug`
//! - **Other platforms**: Scanning only; advertising runs in degraded mode

mod advertising;
mod config;
mod device;
mod discovery;
mod engine;
mod error;
mod events;
mod permissions;
mod preflight;
mod protocol;
pub mod radio;
mod time;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Public API exports
pub use advertising::{AdvertisingMode, AdvertisingSession, SessionSnapshot};
pub use config::{EngineConfig, RolePolicy, MAX_LIVENESS_INTERVAL_MS, MAX_TIMEOUT_SECS};
pub use device::DiscoveredDevice;
pub use discovery::{DiscoveryScanner, ReceiverMatcher, ScanOutcome, ScanStream};
pub use engine::PresenceEngine;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus};
pub use permissions::{Capability, PermissionGate, PermissionModel, PermissionSet, RadioOperation};
pub use preflight::Preflight;
pub use protocol::{
    encode_subject_payload, generate_device_name, parse_subject_id, AdvertisementConfig,
    BeaconIdentity, BeaconScheme, ATTENDANCE_NAME_PREFIX, ATTENDANCE_SERVICE_UUID,
    CHECK_IN_CHARACTERISTIC_UUID, MANUFACTURER_ID, MAX_LOCAL_NAME_LEN, RECEIVER_NAME_FRAGMENT,
    STUDENT_NAME_PREFIX,
};
pub use radio::{HostRadio, PeripheralSupport, RadioManager, RadioMonitor, RadioState};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
