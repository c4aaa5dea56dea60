//! Devices observed during a scan

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::parse_subject_id;

// ----------------------------------------------------------------------------
// Discovered Device
// ----------------------------------------------------------------------------

/// A device seen in a scan window
///
/// Lives only as long as the scan that produced it; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Stable radio address (or platform identifier)
    pub id: String,
    pub display_name: Option<String>,
    /// RSSI in dBm
    pub signal_strength: Option<i16>,
    pub service_ids: BTreeSet<Uuid>,
    pub manufacturer_data: Option<Vec<u8>>,
}

impl DiscoveredDevice {
    /// Create a device with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            signal_strength: None,
            service_ids: BTreeSet::new(),
            manufacturer_data: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.signal_strength = Some(rssi);
        self
    }

    pub fn with_service(mut self, service: Uuid) -> Self {
        self.service_ids.insert(service);
        self
    }

    pub fn with_manufacturer_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data = Some(data.into());
        self
    }

    /// Name for display, `"Unknown"` when the device advertised none
    pub fn name_or_unknown(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown")
    }

    pub fn advertises_service(&self, service: &Uuid) -> bool {
        self.service_ids.contains(service)
    }

    /// Subject id of a nearby attendance beacon, if this is one
    pub fn beacon_subject_id(&self) -> Option<&str> {
        self.display_name.as_deref().and_then(parse_subject_id)
    }

    /// Manufacturer payload as lowercase hex
    pub fn manufacturer_hex(&self) -> Option<String> {
        self.manufacturer_data.as_ref().map(hex::encode)
    }
}
