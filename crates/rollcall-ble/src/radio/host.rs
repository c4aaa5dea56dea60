//! Host radio backed by btleplug (central role) and the platform advertiser

use std::collections::BTreeSet;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::DiscoveredDevice;
use crate::error::{EngineError, Result};
use crate::permissions::{Capability, PermissionSet};
use crate::protocol::{AdvertisementConfig, MANUFACTURER_ID};

use super::{
    BleAdvertiser, DeviceStream, PeripheralSupport, PlatformAdvertiser, RadioManager, RadioState,
};

// ----------------------------------------------------------------------------
// Host Radio
// ----------------------------------------------------------------------------

/// Radio manager for the machine the engine runs on
pub struct HostRadio {
    adapter: Adapter,
    advertiser: Mutex<PlatformAdvertiser>,
    connection_timeout: Duration,
}

impl HostRadio {
    /// Open the first BLE adapter
    pub async fn new(connection_timeout: Duration) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to create BLE manager: {}", e)))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to get BLE adapters: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::StackError("No BLE adapters available".to_string()))?;

        info!("BLE adapter initialized");
        Ok(Self {
            adapter,
            advertiser: Mutex::new(PlatformAdvertiser::new()),
            connection_timeout,
        })
    }

    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to list peripherals: {}", e)))?;

        peripherals
            .into_iter()
            .find(|p| device_key(&p.id(), p.address().into_inner()) == device_id)
            .ok_or_else(|| EngineError::StackError(format!("Device {} not seen by adapter", device_id)))
    }
}

/// Stable id for a peripheral: the radio address where the platform exposes
/// one, otherwise the platform identifier.
fn device_key(id: &PeripheralId, address: [u8; 6]) -> String {
    format_address(address).unwrap_or_else(|| format!("{:?}", id))
}

/// Colon-separated address, or None for the all-zero placeholder some
/// platforms report instead of a real address
fn format_address(address: [u8; 6]) -> Option<String> {
    if address == [0u8; 6] {
        return None;
    }
    Some(
        address
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn device_from_properties(id: &PeripheralId, props: PeripheralProperties) -> DiscoveredDevice {
    // Prefer the test/development company id, else any manufacturer payload
    let manufacturer_data = props
        .manufacturer_data
        .get(&MANUFACTURER_ID)
        .cloned()
        .or_else(|| props.manufacturer_data.values().next().cloned());

    DiscoveredDevice {
        id: device_key(id, props.address.into_inner()),
        display_name: props.local_name,
        signal_strength: props.rssi,
        service_ids: props.services.into_iter().collect::<BTreeSet<Uuid>>(),
        manufacturer_data,
    }
}

#[async_trait::async_trait]
impl RadioManager for HostRadio {
    async fn query_state(&self) -> Result<RadioState> {
        if let Some(state) = self.advertiser.lock().await.adapter_state().await {
            return Ok(state);
        }

        match self.adapter.adapter_info().await {
            Ok(_) => Ok(RadioState::PoweredOn),
            Err(btleplug::Error::PermissionDenied) => Ok(RadioState::Unauthorized),
            Err(e) => {
                debug!("Adapter info unavailable: {}", e);
                Ok(RadioState::Unknown)
            }
        }
    }

    async fn request_capabilities(&self, capabilities: &[Capability]) -> Result<PermissionSet> {
        // Desktop stacks grant radio access at install time
        Ok(PermissionSet::from_grants(
            capabilities.iter().map(|cap| (*cap, true)),
        ))
    }

    async fn peripheral_support(&self) -> PeripheralSupport {
        if let Err(e) = self.adapter.adapter_info().await {
            warn!("BLE adapter unusable: {}", e);
            return PeripheralSupport::Unavailable;
        }
        self.advertiser.lock().await.probe().await
    }

    async fn start_advertising(&self, config: &AdvertisementConfig) -> Result<()> {
        self.advertiser.lock().await.start_advertising(config).await
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.advertiser.lock().await.stop_advertising().await
    }

    async fn start_scan(&self) -> Result<DeviceStream> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to get BLE events: {}", e)))?;

        // No service filter: some stacks drop matches on manufacturer payload
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to start BLE scan: {}", e)))?;

        let adapter = self.adapter.clone();
        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let props = peripheral.properties().await.ok()??;
                Some(device_from_properties(&id, props))
            }
        });

        info!("Started BLE scanning");
        Ok(devices.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| EngineError::StackError(format!("Failed to stop BLE scan: {}", e)))
    }

    async fn write_characteristic(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.find_peripheral(device_id).await?;

        match timeout(self.connection_timeout, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(EngineError::StackError(format!("Connection failed: {}", e))),
            Err(_) => return Err(EngineError::StackError("Connection timeout".to_string())),
        }
        info!("Connected to {}", device_id);

        let result = async {
            peripheral.discover_services().await.map_err(|e| {
                EngineError::StackError(format!("Failed to discover services: {}", e))
            })?;

            let target = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic && c.service_uuid == service)
                .ok_or_else(|| {
                    EngineError::StackError(format!("Characteristic not found: {}", characteristic))
                })?;

            peripheral
                .write(&target, value, WriteType::WithResponse)
                .await
                .map_err(|e| EngineError::StackError(format!("Failed to write characteristic: {}", e)))
        }
        .await;

        if let Err(e) = peripheral.disconnect().await {
            warn!("Failed to disconnect from {}: {}", device_id, e);
        }
        result
    }
}
