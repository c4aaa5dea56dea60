//! Advertising session: the student beacon lifecycle
//!
//! `Inactive -> Starting -> {Active | Degraded} -> Inactive`
//!
//! Active means the radio broadcasts the beacon. Degraded means the host can
//! only act as a central: nothing is on air, but the session and its liveness
//! ticks still run so the presentation layer can tell the user.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::permissions::RadioOperation;
use crate::preflight::Preflight;
use crate::protocol::{AdvertisementConfig, BeaconIdentity, BeaconScheme};
use crate::radio::{PeripheralSupport, RadioManager};
use crate::time::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Session Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertisingMode {
    #[default]
    Inactive,
    Starting,
    /// Beacon is on air
    Active,
    /// Host cannot advertise; intent recorded and liveness still reported
    Degraded,
}

impl AdvertisingMode {
    /// Whether a session is established (on air or degraded)
    pub fn is_live(self) -> bool {
        matches!(self, AdvertisingMode::Active | AdvertisingMode::Degraded)
    }
}

/// Point-in-time view of the advertising session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub identity: Option<BeaconIdentity>,
    pub mode: AdvertisingMode,
    pub started_at: Option<Timestamp>,
}

#[derive(Default)]
struct SessionState {
    /// Bumped by every start and stop; in-flight work compares against it
    generation: u64,
    mode: AdvertisingMode,
    identity: Option<BeaconIdentity>,
    started_at: Option<Timestamp>,
    ticker: Option<JoinHandle<()>>,
    on_air: bool,
}

impl SessionState {
    fn take_teardown(&mut self) -> Teardown {
        let teardown = Teardown {
            ticker: self.ticker.take(),
            on_air: std::mem::take(&mut self.on_air),
            was_established: self.mode != AdvertisingMode::Inactive,
        };
        self.mode = AdvertisingMode::Inactive;
        self.identity = None;
        self.started_at = None;
        teardown
    }
}

struct Teardown {
    ticker: Option<JoinHandle<()>>,
    on_air: bool,
    was_established: bool,
}

// ----------------------------------------------------------------------------
// Advertising Session
// ----------------------------------------------------------------------------

pub struct AdvertisingSession {
    radio: Arc<dyn RadioManager>,
    preflight: Arc<Preflight>,
    time_source: Arc<dyn TimeSource>,
    events: EventBus,
    scheme: BeaconScheme,
    liveness_interval: Duration,
    allow_degraded: bool,
    state: Arc<Mutex<SessionState>>,
    /// Serializes advertise/unadvertise calls so an abandoned start cannot
    /// undo the advertisement of the start that replaced it
    radio_lock: Mutex<()>,
}

impl AdvertisingSession {
    pub fn new(
        radio: Arc<dyn RadioManager>,
        preflight: Arc<Preflight>,
        time_source: Arc<dyn TimeSource>,
        events: EventBus,
        config: &EngineConfig,
    ) -> Self {
        Self {
            radio,
            preflight,
            time_source,
            events,
            scheme: config.beacon_scheme,
            liveness_interval: config.liveness_interval(),
            allow_degraded: config.allow_degraded,
            state: Arc::new(Mutex::new(SessionState::default())),
            radio_lock: Mutex::new(()),
        }
    }

    /// Start advertising `identity`, replacing any current session
    pub async fn start(&self, identity: BeaconIdentity) -> Result<AdvertisingMode> {
        let (generation, previous) = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            let previous = state.take_teardown();
            state.mode = AdvertisingMode::Starting;
            state.identity = Some(identity.clone());
            (state.generation, previous)
        };
        self.release(previous).await;

        if let Err(err) = self.preflight.check(RadioOperation::Advertise).await {
            self.abandon(generation).await;
            return Err(err);
        }
        self.ensure_current(generation).await?;

        let support = self.radio.peripheral_support().await;
        self.ensure_current(generation).await?;

        let mode = match support {
            PeripheralSupport::Peripheral => {
                let config = AdvertisementConfig::for_identity(&identity, self.scheme);
                self.go_on_air(generation, &config).await?;
                AdvertisingMode::Active
            }
            PeripheralSupport::CentralOnly if self.allow_degraded => {
                warn!(
                    "Peripheral mode unavailable, advertising {} in degraded mode",
                    identity
                );
                AdvertisingMode::Degraded
            }
            other => {
                warn!("Cannot advertise: peripheral support is {:?}", other);
                self.abandon(generation).await;
                return Err(EngineError::UnsupportedDevice);
            }
        };

        {
            let mut state = self.state.lock().await;
            // Whoever bumped the generation also took the on-air teardown
            if state.generation != generation {
                return Err(EngineError::Cancelled);
            }
            state.mode = mode;
            state.started_at = Some(self.time_source.now());
            state.ticker = Some(spawn_liveness_ticker(
                self.state.clone(),
                self.events.clone(),
                identity.clone(),
                generation,
                self.liveness_interval,
            ));
        }

        info!("Advertising {} ({:?})", identity, mode);
        self.events.emit(EngineEvent::AdvertisingStarted { mode });
        Ok(mode)
    }

    /// Stop the current session. Idempotent and never fails.
    pub async fn stop(&self) {
        let teardown = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.take_teardown()
        };
        self.release(teardown).await;
    }

    pub async fn current(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            identity: state.identity.clone(),
            mode: state.mode,
            started_at: state.started_at,
        }
    }

    pub async fn mode(&self) -> AdvertisingMode {
        self.state.lock().await.mode
    }

    async fn go_on_air(&self, generation: u64, config: &AdvertisementConfig) -> Result<()> {
        let _radio = self.radio_lock.lock().await;
        self.ensure_current(generation).await?;

        if let Err(err) = self.radio.start_advertising(config).await {
            warn!("Radio rejected advertisement '{}': {}", config.local_name, err);
            self.abandon(generation).await;
            return Err(err);
        }

        let mut state = self.state.lock().await;
        if state.generation != generation {
            drop(state);
            debug!("Start superseded while going on air, withdrawing advertisement");
            if let Err(err) = self.radio.stop_advertising().await {
                warn!("Failed to withdraw superseded advertisement: {}", err);
            }
            return Err(EngineError::Cancelled);
        }
        state.on_air = true;
        Ok(())
    }

    /// `Cancelled` if a stop or newer start has taken over
    async fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.state.lock().await.generation == generation {
            Ok(())
        } else {
            debug!("Advertising start superseded");
            Err(EngineError::Cancelled)
        }
    }

    /// Return a failed start to Inactive, unless something newer owns the session
    async fn abandon(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.mode = AdvertisingMode::Inactive;
            state.identity = None;
        }
    }

    async fn release(&self, teardown: Teardown) {
        if let Some(ticker) = teardown.ticker {
            ticker.abort();
        }

        if teardown.on_air {
            let _radio = self.radio_lock.lock().await;
            if let Err(err) = self.radio.stop_advertising().await {
                warn!("Failed to stop advertising: {}", err);
            }
        }

        if teardown.was_established {
            info!("Advertising stopped");
            self.events.emit(EngineEvent::AdvertisingStopped);
        }
    }
}

fn spawn_liveness_ticker(
    state: Arc<Mutex<SessionState>>,
    events: EventBus,
    identity: BeaconIdentity,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(first_tick) = Instant::now().checked_add(period) else {
            warn!("Liveness interval {:?} is out of range, not ticking", period);
            return;
        };
        let mut interval = interval_at(first_tick, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            {
                let state = state.lock().await;
                if state.generation != generation || !state.mode.is_live() {
                    break;
                }
            }
            debug!("Beacon alive: {}", identity);
            events.emit(EngineEvent::AdvertisingLivenessTick {
                identity: identity.clone(),
            });
        }
    })
}
