//! Error types for the presence engine

use thiserror::Error;

use crate::permissions::Capability;
use crate::radio::RadioState;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by engine operations
///
/// A scan that finds nothing is not an error; see [`crate::ScanOutcome::NotFound`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Required capabilities not granted: {missing:?}")]
    PermissionDenied { missing: Vec<Capability> },

    #[error("Bluetooth radio not ready (state: {state:?})")]
    RadioNotReady { state: RadioState },

    #[error("Device supports neither peripheral advertising nor the degraded fallback")]
    UnsupportedDevice,

    #[error("Radio stack error: {0}")]
    StackError(String),

    #[error("Operation superseded by a concurrent stop")]
    Cancelled,

    #[error("Invalid beacon identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Wrap a radio stack failure
    pub fn stack(err: impl std::fmt::Display) -> Self {
        EngineError::StackError(err.to_string())
    }

    /// Whether the user can fix the condition (grant a permission, turn the radio on)
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::PermissionDenied { .. } | EngineError::RadioNotReady { .. }
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
