//! Beacon wire format shared with the attendance receiver

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ----------------------------------------------------------------------------
// Deployment Constants
// ----------------------------------------------------------------------------

/// Service UUID advertised by every subject beacon and exposed by the receiver
pub const ATTENDANCE_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Receiver characteristic that accepts a subject id on check-in
pub const CHECK_IN_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Company identifier used for the manufacturer data field (test/development id)
pub const MANUFACTURER_ID: u16 = 0xFFFF;

/// Local name prefix of the primary beacon scheme
pub const STUDENT_NAME_PREFIX: &str = "STUDENT_";

/// Local name prefix of the alternative (scan-only) beacon scheme
pub const ATTENDANCE_NAME_PREFIX: &str = "ATT_";

/// Name fragment the receiver firmware advertises under
pub const RECEIVER_NAME_FRAGMENT: &str = "ESP32";

/// Longest local name that fits a legacy advertising PDU next to the flags
pub const MAX_LOCAL_NAME_LEN: usize = 29;

// ----------------------------------------------------------------------------
// Beacon Identity
// ----------------------------------------------------------------------------

/// Identity broadcast by an advertising session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentityFields")]
pub struct BeaconIdentity {
    subject_id: String,
    subject_label: String,
}

#[derive(Deserialize)]
struct IdentityFields {
    subject_id: String,
    #[serde(default)]
    subject_label: String,
}

impl TryFrom<IdentityFields> for BeaconIdentity {
    type Error = EngineError;

    fn try_from(fields: IdentityFields) -> Result<Self> {
        Self::new(fields.subject_id, fields.subject_label)
    }
}

impl BeaconIdentity {
    /// Create an identity, checking that the subject id fits the beacon name
    pub fn new(subject_id: impl Into<String>, subject_label: impl Into<String>) -> Result<Self> {
        let subject_id = subject_id.into();

        if subject_id.is_empty() {
            return Err(EngineError::InvalidIdentity(
                "subject id must not be empty".to_string(),
            ));
        }
        if subject_id.chars().any(char::is_whitespace) {
            return Err(EngineError::InvalidIdentity(format!(
                "subject id '{}' contains whitespace",
                subject_id
            )));
        }
        let name_len = STUDENT_NAME_PREFIX.len() + subject_id.len();
        if name_len > MAX_LOCAL_NAME_LEN {
            return Err(EngineError::InvalidIdentity(format!(
                "subject id '{}' yields a {} byte local name (max: {})",
                subject_id, name_len, MAX_LOCAL_NAME_LEN
            )));
        }

        Ok(Self {
            subject_id,
            subject_label: subject_label.into(),
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn subject_label(&self) -> &str {
        &self.subject_label
    }
}

impl fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject_id, self.subject_label)
    }
}

// ----------------------------------------------------------------------------
// Advertisement Layout
// ----------------------------------------------------------------------------

/// How a subject beacon is laid out on air
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconScheme {
    /// `STUDENT_<id>`, connectable, subject id in manufacturer data
    #[default]
    Student,
    /// `ATT_<id>`, scan-only, name and service UUID only
    Attendance,
}

impl BeaconScheme {
    pub fn name_prefix(self) -> &'static str {
        match self {
            BeaconScheme::Student => STUDENT_NAME_PREFIX,
            BeaconScheme::Attendance => ATTENDANCE_NAME_PREFIX,
        }
    }
}

/// Parameters handed to the radio manager to start peripheral advertising
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementConfig {
    pub local_name: String,
    pub service_uuids: Vec<Uuid>,
    /// Company id and payload
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
    pub connectable: bool,
    pub include_tx_power: bool,
}

impl AdvertisementConfig {
    /// Build the advertisement for an identity. No expiry: the radio keeps
    /// advertising until told to stop.
    pub fn for_identity(identity: &BeaconIdentity, scheme: BeaconScheme) -> Self {
        let local_name = generate_device_name(identity, scheme);
        match scheme {
            BeaconScheme::Student => Self {
                local_name,
                service_uuids: vec![ATTENDANCE_SERVICE_UUID],
                manufacturer_data: Some((MANUFACTURER_ID, encode_subject_payload(identity))),
                connectable: true,
                include_tx_power: true,
            },
            BeaconScheme::Attendance => Self {
                local_name,
                service_uuids: vec![ATTENDANCE_SERVICE_UUID],
                manufacturer_data: None,
                connectable: false,
                include_tx_power: false,
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Protocol Utilities
// ----------------------------------------------------------------------------

/// Discoverable name for an identity under the given scheme
pub fn generate_device_name(identity: &BeaconIdentity, scheme: BeaconScheme) -> String {
    format!("{}{}", scheme.name_prefix(), identity.subject_id())
}

/// Subject id as raw UTF-8 manufacturer payload
pub fn encode_subject_payload(identity: &BeaconIdentity) -> Vec<u8> {
    identity.subject_id().as_bytes().to_vec()
}

/// Recover the subject id from a beacon name of either scheme
pub fn parse_subject_id(name: &str) -> Option<&str> {
    [STUDENT_NAME_PREFIX, ATTENDANCE_NAME_PREFIX]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .filter(|id| !id.is_empty())
}
