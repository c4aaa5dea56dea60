//! Checks run immediately before every radio operation

use std::sync::Arc;

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::permissions::{PermissionGate, PermissionModel, PermissionSet, RadioOperation};
use crate::radio::{RadioManager, RadioMonitor, RadioState};

/// Permission gate plus radio readiness, reporting failures on the event bus
pub struct Preflight {
    gate: PermissionGate,
    monitor: RadioMonitor,
    events: EventBus,
}

impl Preflight {
    pub fn new(radio: Arc<dyn RadioManager>, model: PermissionModel, events: EventBus) -> Self {
        Self {
            gate: PermissionGate::new(radio.clone(), model),
            monitor: RadioMonitor::new(radio),
            events,
        }
    }

    pub async fn request_permissions(&self) -> PermissionSet {
        self.gate.request_permissions().await
    }

    pub async fn radio_state(&self) -> RadioState {
        self.monitor.state().await
    }

    /// Fails with `PermissionDenied` or `RadioNotReady`, never caching either answer
    pub async fn check(&self, operation: RadioOperation) -> Result<()> {
        if let Err(err) = self.gate.ensure(operation).await {
            if let EngineError::PermissionDenied { missing } = &err {
                warn!("{:?} blocked, missing capabilities {:?}", operation, missing);
                self.events.emit(EngineEvent::PermissionDenied {
                    missing: missing.clone(),
                });
            }
            return Err(err);
        }

        let state = self.monitor.state().await;
        if state != RadioState::PoweredOn {
            warn!("{:?} blocked, radio is {:?}", operation, state);
            self.events.emit(EngineEvent::RadioNotReady { state });
            return Err(EngineError::RadioNotReady { state });
        }

        Ok(())
    }
}
