//! In-memory radio manager for tests
//!
//! Scripted state, grants, and peripheral support; devices emitted at fixed
//! offsets from scan start (driven by `tokio::time`, so a paused runtime makes
//! them deterministic); failure injection and counters for assertions.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use crate::device::DiscoveredDevice;
use crate::error::{EngineError, Result};
use crate::permissions::{Capability, PermissionSet};
use crate::protocol::AdvertisementConfig;
use crate::radio::{DeviceStream, PeripheralSupport, RadioManager, RadioState};

/// A characteristic write recorded by [`MockRadio`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicWrite {
    pub device_id: String,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

struct MockState {
    radio_state: RadioState,
    fail_state_query: bool,
    grants: PermissionSet,
    capability_requests: usize,
    last_requested: Vec<Capability>,
    peripheral_support: PeripheralSupport,
    advertise_delay: Option<Duration>,
    fail_advertising: bool,
    advertising: bool,
    advertising_starts: usize,
    last_advertisement: Option<AdvertisementConfig>,
    scripted_devices: Vec<(Duration, DiscoveredDevice)>,
    scanning: bool,
    scan_starts: usize,
    scan_stops: usize,
    fail_writes: bool,
    writes: Vec<CharacteristicWrite>,
}

/// Radio manager whose behavior is scripted by the test
pub struct MockRadio {
    state: Mutex<MockState>,
}

impl MockRadio {
    /// Powered on, everything granted, peripheral capable
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                radio_state: RadioState::PoweredOn,
                fail_state_query: false,
                grants: PermissionSet::all_granted(),
                capability_requests: 0,
                last_requested: Vec::new(),
                peripheral_support: PeripheralSupport::Peripheral,
                advertise_delay: None,
                fail_advertising: false,
                advertising: false,
                advertising_starts: 0,
                last_advertisement: None,
                scripted_devices: Vec::new(),
                scanning: false,
                scan_starts: 0,
                scan_stops: 0,
                fail_writes: false,
                writes: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_grants(self, grants: PermissionSet) -> Self {
        self.lock().grants = grants;
        self
    }

    pub fn with_peripheral_support(self, support: PeripheralSupport) -> Self {
        self.lock().peripheral_support = support;
        self
    }

    /// Emit `device` this long after each scan starts
    pub fn with_device(self, after: Duration, device: DiscoveredDevice) -> Self {
        self.lock().scripted_devices.push((after, device));
        self
    }

    /// Delay every `start_advertising` call
    pub fn with_advertise_delay(self, delay: Duration) -> Self {
        self.lock().advertise_delay = Some(delay);
        self
    }

    pub fn set_state(&self, state: RadioState) {
        self.lock().radio_state = state;
    }

    pub fn set_grants(&self, grants: PermissionSet) {
        self.lock().grants = grants;
    }

    pub fn fail_state_query(&self, fail: bool) {
        self.lock().fail_state_query = fail;
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.lock().fail_advertising = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn capability_requests(&self) -> usize {
        self.lock().capability_requests
    }

    pub fn last_requested_capabilities(&self) -> Vec<Capability> {
        self.lock().last_requested.clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising
    }

    pub fn advertising_starts(&self) -> usize {
        self.lock().advertising_starts
    }

    pub fn last_advertisement(&self) -> Option<AdvertisementConfig> {
        self.lock().last_advertisement.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn scan_starts(&self) -> usize {
        self.lock().scan_starts
    }

    pub fn scan_stops(&self) -> usize {
        self.lock().scan_stops
    }

    pub fn writes(&self) -> Vec<CharacteristicWrite> {
        self.lock().writes.clone()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RadioManager for MockRadio {
    async fn query_state(&self) -> Result<RadioState> {
        let state = self.lock();
        if state.fail_state_query {
            return Err(EngineError::stack("state query failed"));
        }
        Ok(state.radio_state)
    }

    async fn request_capabilities(&self, capabilities: &[Capability]) -> Result<PermissionSet> {
        let mut state = self.lock();
        state.capability_requests += 1;
        state.last_requested = capabilities.to_vec();
        Ok(state.grants.clone())
    }

    async fn peripheral_support(&self) -> PeripheralSupport {
        self.lock().peripheral_support
    }

    async fn start_advertising(&self, config: &AdvertisementConfig) -> Result<()> {
        let delay = self.lock().advertise_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_advertising {
            return Err(EngineError::stack("advertise failed"));
        }
        state.advertising = true;
        state.advertising_starts += 1;
        state.last_advertisement = Some(config.clone());
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.lock().advertising = false;
        Ok(())
    }

    async fn start_scan(&self) -> Result<DeviceStream> {
        let scripted = {
            let mut state = self.lock();
            state.scanning = true;
            state.scan_starts += 1;
            state.scripted_devices.clone()
        };

        let started = Instant::now();
        let devices = stream::iter(scripted)
            .then(move |(after, device)| async move {
                sleep_until(started + after).await;
                device
            })
            // A real scan keeps running until stopped
            .chain(stream::pending());
        Ok(devices.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.lock();
        if state.scanning {
            state.scanning = false;
            state.scan_stops += 1;
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(EngineError::stack("write failed"));
        }
        state.writes.push(CharacteristicWrite {
            device_id: device_id.to_string(),
            service,
            characteristic,
            value: value.to_vec(),
        });
        Ok(())
    }
}
