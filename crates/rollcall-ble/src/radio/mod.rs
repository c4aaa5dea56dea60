//! Radio manager boundary and radio state monitoring
//!
//! The engine never talks to a native Bluetooth API directly. Everything goes
//! through [`RadioManager`], implemented by [`HostRadio`] for real hardware and
//! by `MockRadio` (feature `testing`) for tests.

pub mod advertiser;
pub mod host;

pub use advertiser::{BleAdvertiser, PlatformAdvertiser};
pub use host::HostRadio;

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::device::DiscoveredDevice;
use crate::error::Result;
use crate::permissions::{Capability, PermissionSet};
use crate::protocol::AdvertisementConfig;

// ----------------------------------------------------------------------------
// Radio Types
// ----------------------------------------------------------------------------

/// Power/authorization state reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    #[default]
    Unknown,
    PoweredOff,
    PoweredOn,
    Unauthorized,
    Resetting,
}

/// Result of probing whether the host can act as a BLE peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralSupport {
    /// True peripheral-mode advertising is available
    Peripheral,
    /// Scanning works but the stack cannot advertise
    CentralOnly,
    /// No usable radio at all
    Unavailable,
}

/// Unfiltered stream of advertisement observations from an open scan
///
/// The same device may appear many times; deduplication is the scanner's job.
pub type DeviceStream = BoxStream<'static, DiscoveredDevice>;

// ----------------------------------------------------------------------------
// Radio Manager Trait
// ----------------------------------------------------------------------------

/// Capability set the engine consumes from the underlying radio stack
#[async_trait::async_trait]
pub trait RadioManager: Send + Sync {
    /// Current power/authorization state
    async fn query_state(&self) -> Result<RadioState>;

    /// Request the given capabilities in one batch, returning the grant status
    async fn request_capabilities(&self, capabilities: &[Capability]) -> Result<PermissionSet>;

    /// Whether the host radio can act as a peripheral
    async fn peripheral_support(&self) -> PeripheralSupport;

    /// Begin continuous peripheral-mode advertising
    async fn start_advertising(&self, config: &AdvertisementConfig) -> Result<()>;

    /// Stop advertising. Stopping when not advertising succeeds.
    async fn stop_advertising(&self) -> Result<()>;

    /// Open an unfiltered device scan
    async fn start_scan(&self) -> Result<DeviceStream>;

    /// Close the device scan. Stopping when not scanning succeeds.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a device, write `value` to a characteristic with response,
    /// and disconnect
    async fn write_characteristic(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Radio State Monitor
// ----------------------------------------------------------------------------

/// Answers whether the radio is powered on and ready, without caching
pub struct RadioMonitor {
    radio: Arc<dyn RadioManager>,
}

impl RadioMonitor {
    pub fn new(radio: Arc<dyn RadioManager>) -> Self {
        Self { radio }
    }

    /// Query the radio state now. A failed query reads as `Unknown`.
    pub async fn state(&self) -> RadioState {
        match self.radio.query_state().await {
            Ok(state) => {
                debug!("Radio state: {:?}", state);
                state
            }
            Err(e) => {
                warn!("Failed to query radio state: {}", e);
                RadioState::Unknown
            }
        }
    }

    /// True iff the radio is powered on. Never tries to enable it.
    pub async fn is_ready(&self) -> bool {
        self.state().await == RadioState::PoweredOn
    }
}
