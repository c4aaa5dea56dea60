//! Events published to the presentation layer

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::advertising::AdvertisingMode;
use crate::device::DiscoveredDevice;
use crate::permissions::Capability;
use crate::protocol::BeaconIdentity;
use crate::radio::RadioState;

/// Status events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PermissionDenied { missing: Vec<Capability> },
    RadioNotReady { state: RadioState },
    AdvertisingStarted { mode: AdvertisingMode },
    AdvertisingLivenessTick { identity: BeaconIdentity },
    AdvertisingStopped,
    ReceiverFound { device: DiscoveredDevice },
    ReceiverNotFound,
    /// Diagnostic: every distinct device seen in a scan window
    ScanDeviceObserved { device: DiscoveredDevice },
    CheckInDelivered { device_id: String, subject_id: String },
}

/// Fan-out of engine events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: EngineEvent) {
        trace!("Engine event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
