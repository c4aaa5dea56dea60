//! Permission gate: runtime capability grants required before radio operations

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::radio::RadioManager;

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// A radio-related capability the host platform may grant or withhold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Scan,
    Connect,
    Advertise,
    CoarseLocation,
    FineLocation,
}

impl Capability {
    /// Every capability the engine may need, requested together in one prompt
    pub const ALL: [Capability; 5] = [
        Capability::CoarseLocation,
        Capability::FineLocation,
        Capability::Scan,
        Capability::Connect,
        Capability::Advertise,
    ];
}

/// Radio operations gated on capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioOperation {
    Advertise,
    Scan,
    CheckIn,
}

impl RadioOperation {
    fn required(self) -> &'static [Capability] {
        match self {
            RadioOperation::Advertise => &[Capability::Advertise, Capability::Connect],
            RadioOperation::Scan => &[Capability::Scan],
            RadioOperation::CheckIn => &[Capability::Connect, Capability::Scan],
        }
    }

    /// Scanning is location-sensitive on many platforms; either grade of
    /// location grant satisfies it.
    fn needs_location(self) -> bool {
        matches!(self, RadioOperation::Scan | RadioOperation::CheckIn)
    }
}

// ----------------------------------------------------------------------------
// Permission Set
// ----------------------------------------------------------------------------

/// Grant status per capability. Unset capabilities count as denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    grants: BTreeMap<Capability, bool>,
}

impl PermissionSet {
    pub fn all_granted() -> Self {
        Self::from_grants(Capability::ALL.iter().map(|cap| (*cap, true)))
    }

    pub fn from_grants(grants: impl IntoIterator<Item = (Capability, bool)>) -> Self {
        Self {
            grants: grants.into_iter().collect(),
        }
    }

    /// Set a single grant
    pub fn with(mut self, capability: Capability, granted: bool) -> Self {
        self.grants.insert(capability, granted);
        self
    }

    pub fn is_granted(&self, capability: Capability) -> bool {
        self.grants.get(&capability).copied().unwrap_or(false)
    }

    /// Whether every capability in [`Capability::ALL`] is granted
    pub fn all_required_granted(&self) -> bool {
        Capability::ALL.iter().all(|cap| self.is_granted(*cap))
    }

    /// Capabilities still missing for an operation
    pub fn missing_for(&self, operation: RadioOperation) -> Vec<Capability> {
        let mut missing: Vec<Capability> = operation
            .required()
            .iter()
            .copied()
            .filter(|cap| !self.is_granted(*cap))
            .collect();

        if operation.needs_location()
            && !self.is_granted(Capability::CoarseLocation)
            && !self.is_granted(Capability::FineLocation)
        {
            missing.push(Capability::FineLocation);
        }

        missing
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, bool)> + '_ {
        self.grants.iter().map(|(cap, granted)| (*cap, *granted))
    }
}

// ----------------------------------------------------------------------------
// Permission Gate
// ----------------------------------------------------------------------------

/// How the host platform hands out radio capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionModel {
    /// Granted when the application is installed (desktop, iOS)
    #[default]
    InstallTime,
    /// Granted by the user at runtime through a system prompt (Android 12+)
    Runtime,
}

/// Determines whether the environment grants the capabilities the engine needs
pub struct PermissionGate {
    radio: Arc<dyn RadioManager>,
    model: PermissionModel,
}

impl PermissionGate {
    pub fn new(radio: Arc<dyn RadioManager>, model: PermissionModel) -> Self {
        Self { radio, model }
    }

    /// Request every capability in a single batch
    ///
    /// A denial is encoded in the returned set. A radio stack that fails to
    /// answer is treated as having granted nothing.
    pub async fn request_permissions(&self) -> PermissionSet {
        match self.model {
            PermissionModel::InstallTime => PermissionSet::all_granted(),
            PermissionModel::Runtime => {
                match self.radio.request_capabilities(&Capability::ALL).await {
                    Ok(grants) => {
                        debug!("Capability grants: {:?}", grants);
                        grants
                    }
                    Err(e) => {
                        warn!("Capability request failed, treating as denied: {}", e);
                        PermissionSet::default()
                    }
                }
            }
        }
    }

    /// Re-check grants immediately before an operation
    pub async fn ensure(&self, operation: RadioOperation) -> Result<()> {
        let missing = self.request_permissions().await.missing_for(operation);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied { missing })
        }
    }
}
