//! Presence engine: the explicit instance presentation layers drive

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::advertising::{AdvertisingMode, AdvertisingSession, SessionSnapshot};
use crate::config::{EngineConfig, RolePolicy};
use crate::device::DiscoveredDevice;
use crate::discovery::{DiscoveryScanner, ReceiverMatcher, ScanOutcome, ScanStream};
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::permissions::{PermissionSet, RadioOperation};
use crate::preflight::Preflight;
use crate::protocol::{
    encode_subject_payload, BeaconIdentity, ATTENDANCE_SERVICE_UUID, CHECK_IN_CHARACTERISTIC_UUID,
};
use crate::radio::{RadioManager, RadioState};
use crate::time::TimeSource;

/// Advertising, discovery, and check-in over one shared radio
pub struct PresenceEngine {
    radio: Arc<dyn RadioManager>,
    config: EngineConfig,
    events: EventBus,
    preflight: Arc<Preflight>,
    advertising: AdvertisingSession,
    scanner: DiscoveryScanner,
}

impl PresenceEngine {
    pub fn new(
        radio: Arc<dyn RadioManager>,
        time_source: Arc<dyn TimeSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let preflight = Arc::new(Preflight::new(
            radio.clone(),
            config.permission_model,
            events.clone(),
        ));
        let advertising = AdvertisingSession::new(
            radio.clone(),
            preflight.clone(),
            time_source,
            events.clone(),
            &config,
        );
        let scanner = DiscoveryScanner::new(
            radio.clone(),
            preflight.clone(),
            events.clone(),
            ReceiverMatcher::new(config.receiver_name_fragment.clone()),
        );

        Ok(Self {
            radio,
            config,
            events,
            preflight,
            advertising,
            scanner,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Readiness
    // ------------------------------------------------------------------------

    /// Request every capability the engine needs in one batch
    pub async fn request_permissions(&self) -> PermissionSet {
        self.preflight.request_permissions().await
    }

    pub async fn radio_state(&self) -> RadioState {
        self.preflight.radio_state().await
    }

    pub async fn is_ready(&self) -> bool {
        self.radio_state().await == RadioState::PoweredOn
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    /// Start advertising `identity`, replacing any current session
    pub async fn start_advertising(&self, identity: BeaconIdentity) -> Result<AdvertisingMode> {
        if self.config.role_policy == RolePolicy::Exclusive && self.scanner.is_active().await {
            info!("Stopping active scan before advertising");
            self.scanner.stop().await;
        }
        self.advertising.start(identity).await
    }

    pub async fn stop_advertising(&self) {
        self.advertising.stop().await;
    }

    pub async fn advertising_status(&self) -> SessionSnapshot {
        self.advertising.current().await
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    pub async fn scan<P>(&self, predicate: P, timeout: Duration) -> Result<ScanOutcome>
    where
        P: Fn(&DiscoveredDevice) -> bool + Send,
    {
        self.yield_radio().await;
        self.scanner.scan(predicate, timeout).await
    }

    /// Scan for the classroom receiver; `None` uses the configured timeout
    pub async fn scan_for_receiver(&self, timeout: Option<Duration>) -> Result<ScanOutcome> {
        self.yield_radio().await;
        self.scanner
            .scan_for_receiver(timeout.unwrap_or_else(|| self.config.receiver_scan_timeout()))
            .await
    }

    /// Diagnostic scan of every nearby device; `None` uses the configured window
    pub async fn scan_all(&self, timeout: Option<Duration>) -> Result<ScanStream> {
        self.yield_radio().await;
        self.scanner
            .scan_all(timeout.unwrap_or_else(|| self.config.scan_all_timeout()))
            .await
    }

    pub async fn stop_scan(&self) {
        self.scanner.stop().await;
    }

    // ------------------------------------------------------------------------
    // Check-in
    // ------------------------------------------------------------------------

    /// Write the subject id to the receiver's check-in characteristic
    pub async fn check_in(&self, device_id: &str, identity: &BeaconIdentity) -> Result<()> {
        self.preflight.check(RadioOperation::CheckIn).await?;
        self.yield_radio().await;

        self.radio
            .write_characteristic(
                device_id,
                ATTENDANCE_SERVICE_UUID,
                CHECK_IN_CHARACTERISTIC_UUID,
                &encode_subject_payload(identity),
            )
            .await?;

        info!("Checked in {} at {}", identity, device_id);
        self.events.emit(EngineEvent::CheckInDelivered {
            device_id: device_id.to_string(),
            subject_id: identity.subject_id().to_string(),
        });
        Ok(())
    }

    /// Find the receiver and check in to the first match
    pub async fn find_and_check_in(
        &self,
        identity: &BeaconIdentity,
        timeout: Option<Duration>,
    ) -> Result<ScanOutcome> {
        let outcome = self.scan_for_receiver(timeout).await?;
        if let ScanOutcome::Found(device) = &outcome {
            self.check_in(&device.id, identity).await?;
        }
        Ok(outcome)
    }

    /// Stop advertising and any scan in progress
    pub async fn shutdown(&self) {
        self.scanner.stop().await;
        self.advertising.stop().await;
    }

    /// Under the exclusive role policy, central work preempts an on-air beacon.
    /// Degraded sessions do not use the radio and keep running.
    async fn yield_radio(&self) {
        if self.config.role_policy == RolePolicy::Exclusive
            && self.advertising.mode().await == AdvertisingMode::Active
        {
            info!("Stopping advertising to free the radio for scanning");
            self.advertising.stop().await;
        }
    }
}
