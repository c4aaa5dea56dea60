//! Cross-platform advertiser trait and platform detection
//!
//! btleplug only covers the central role, so peripheral-mode advertising is
//! provided per platform. Platforms without an implementation get the
//! fallback advertiser, which reports central-only support and drives the
//! engine onto its degraded path.

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use crate::error::Result;
use crate::protocol::AdvertisementConfig;

use super::{PeripheralSupport, RadioState};

// ----------------------------------------------------------------------------
// Cross-platform Advertising Trait
// ----------------------------------------------------------------------------

/// Trait for BLE advertising functionality across different platforms
#[async_trait::async_trait]
pub trait BleAdvertiser: Send + Sync {
    /// Probe whether this platform can advertise as a peripheral
    async fn probe(&mut self) -> PeripheralSupport;

    /// Adapter power state, when the platform stack exposes it
    async fn adapter_state(&mut self) -> Option<RadioState>;

    /// Start advertising with the given configuration
    async fn start_advertising(&mut self, config: &AdvertisementConfig) -> Result<()>;

    /// Stop advertising
    async fn stop_advertising(&mut self) -> Result<()>;

    /// Check if currently advertising
    fn is_advertising(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific advertiser enum
pub enum PlatformAdvertiser {
    #[cfg(target_os = "linux")]
    Linux(linux::LinuxAdvertiser),
    #[allow(dead_code)]
    Fallback(fallback::FallbackAdvertiser),
}

impl PlatformAdvertiser {
    /// Create the appropriate advertiser for the current platform
    pub fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::LinuxAdvertiser::new())
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(fallback::FallbackAdvertiser::new())
        }
    }
}

impl Default for PlatformAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for PlatformAdvertiser {
    async fn probe(&mut self) -> PeripheralSupport {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.probe().await,
            Self::Fallback(ref mut advertiser) => advertiser.probe().await,
        }
    }

    async fn adapter_state(&mut self) -> Option<RadioState> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.adapter_state().await,
            Self::Fallback(ref mut advertiser) => advertiser.adapter_state().await,
        }
    }

    async fn start_advertising(&mut self, config: &AdvertisementConfig) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.start_advertising(config).await,
            Self::Fallback(ref mut advertiser) => advertiser.start_advertising(config).await,
        }
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.stop_advertising().await,
            Self::Fallback(ref mut advertiser) => advertiser.stop_advertising().await,
        }
    }

    fn is_advertising(&self) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref advertiser) => advertiser.is_advertising(),
            Self::Fallback(ref advertiser) => advertiser.is_advertising(),
        }
    }
}
