//! Linux BLE advertising implementation using bluer (BlueZ)

use std::collections::{BTreeMap, BTreeSet};

use bluer::adv::{Advertisement, AdvertisementHandle, Feature, Type};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::protocol::AdvertisementConfig;
use crate::radio::{PeripheralSupport, RadioState};

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct LinuxAdvertiser {
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    advertisement_handle: Option<AdvertisementHandle>,
}

impl LinuxAdvertiser {
    pub fn new() -> Self {
        Self {
            session: None,
            adapter: None,
            advertisement_handle: None,
        }
    }

    /// Open the BlueZ session lazily. The adapter is never powered on here;
    /// that is the user's decision.
    async fn initialize(&mut self) -> Result<&bluer::Adapter> {
        if self.adapter.is_none() {
            let session = bluer::Session::new()
                .await
                .map_err(|e| EngineError::StackError(format!("BlueZ session: {}", e)))?;

            let adapter = session
                .default_adapter()
                .await
                .map_err(|e| EngineError::StackError(format!("BLE adapter: {}", e)))?;

            info!("BlueZ adapter {} opened for advertising", adapter.name());
            self.session = Some(session);
            self.adapter = Some(adapter);
        }

        self.adapter
            .as_ref()
            .ok_or_else(|| EngineError::StackError("BLE adapter not initialized".to_string()))
    }
}

impl Default for LinuxAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

fn to_bluer_advertisement(config: &AdvertisementConfig) -> Advertisement {
    let mut manufacturer_data = BTreeMap::new();
    if let Some((company_id, payload)) = &config.manufacturer_data {
        manufacturer_data.insert(*company_id, payload.clone());
    }

    let mut system_includes = BTreeSet::new();
    if config.include_tx_power {
        system_includes.insert(Feature::TxPower);
    }

    Advertisement {
        advertisement_type: if config.connectable {
            Type::Peripheral
        } else {
            Type::Broadcast
        },
        service_uuids: config.service_uuids.iter().copied().collect(),
        manufacturer_data,
        local_name: Some(config.local_name.clone()),
        discoverable: Some(true),
        system_includes,
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for LinuxAdvertiser {
    async fn probe(&mut self) -> PeripheralSupport {
        let adapter = match self.initialize().await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("Peripheral probe failed: {}", e);
                return PeripheralSupport::CentralOnly;
            }
        };

        match adapter.supported_advertising_instances().await {
            Ok(instances) if instances > 0 => PeripheralSupport::Peripheral,
            Ok(_) => {
                debug!("Adapter reports no free advertising instances");
                PeripheralSupport::CentralOnly
            }
            Err(e) => {
                debug!("Adapter has no LE advertising manager: {}", e);
                PeripheralSupport::CentralOnly
            }
        }
    }

    async fn adapter_state(&mut self) -> Option<RadioState> {
        let adapter = self.initialize().await.ok()?;
        match adapter.is_powered().await {
            Ok(true) => Some(RadioState::PoweredOn),
            Ok(false) => Some(RadioState::PoweredOff),
            Err(e) if e.kind == bluer::ErrorKind::NotAuthorized => Some(RadioState::Unauthorized),
            Err(e) => {
                debug!("Failed to read adapter power state: {}", e);
                Some(RadioState::Unknown)
            }
        }
    }

    async fn start_advertising(&mut self, config: &AdvertisementConfig) -> Result<()> {
        // Replacing a live advertisement releases the previous handle first
        self.advertisement_handle = None;

        let adapter = self.initialize().await?;
        let handle = adapter
            .advertise(to_bluer_advertisement(config))
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to start advertising: {}", e)))?;

        self.advertisement_handle = Some(handle);
        info!("Started BLE advertising as '{}'", config.local_name);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        if let Some(handle) = self.advertisement_handle.take() {
            drop(handle); // Dropping the handle unregisters the advertisement
            info!("Stopped BLE advertising");
        }
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertisement_handle.is_some()
    }
}
