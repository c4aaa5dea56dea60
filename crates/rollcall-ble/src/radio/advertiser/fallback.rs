//! Fallback advertiser for platforms without peripheral-mode support

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::protocol::AdvertisementConfig;
use crate::radio::{PeripheralSupport, RadioState};

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Advertiser that never broadcasts
#[derive(Debug, Default)]
pub struct FallbackAdvertiser;

impl FallbackAdvertiser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for FallbackAdvertiser {
    async fn probe(&mut self) -> PeripheralSupport {
        PeripheralSupport::CentralOnly
    }

    async fn adapter_state(&mut self) -> Option<RadioState> {
        None
    }

    async fn start_advertising(&mut self, config: &AdvertisementConfig) -> Result<()> {
        warn!(
            "BLE advertising not supported on this platform. Beacon '{}' will not be discoverable. \
            Use Linux with BlueZ for peripheral mode.",
            config.local_name
        );
        Err(EngineError::StackError(
            "peripheral mode not supported on this platform".to_string(),
        ))
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        false
    }
}
