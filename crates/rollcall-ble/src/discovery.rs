//! Device discovery: bounded, deduplicated scans and receiver matching

use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future;
use futures::stream::{self, AbortHandle, BoxStream, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::DiscoveredDevice;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::permissions::RadioOperation;
use crate::preflight::Preflight;
use crate::protocol::{ATTENDANCE_SERVICE_UUID, RECEIVER_NAME_FRAGMENT};
use crate::radio::RadioManager;

// ----------------------------------------------------------------------------
// Matching
// ----------------------------------------------------------------------------

/// Recognizes the classroom receiver among scanned devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverMatcher {
    name_fragment: String,
    service: Uuid,
}

impl ReceiverMatcher {
    pub fn new(name_fragment: impl Into<String>) -> Self {
        Self {
            name_fragment: name_fragment.into(),
            service: ATTENDANCE_SERVICE_UUID,
        }
    }

    /// Name contains the receiver fragment, or the device advertises the
    /// attendance service
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        let name_match = device
            .display_name
            .as_deref()
            .is_some_and(|name| name.contains(&self.name_fragment));
        name_match || device.advertises_service(&self.service)
    }
}

impl Default for ReceiverMatcher {
    fn default() -> Self {
        Self::new(RECEIVER_NAME_FRAGMENT)
    }
}

/// Result of a bounded scan. Not finding anything is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(DiscoveredDevice),
    NotFound,
}

impl ScanOutcome {
    pub fn device(&self) -> Option<&DiscoveredDevice> {
        match self {
            ScanOutcome::Found(device) => Some(device),
            ScanOutcome::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ScanOutcome::Found(_))
    }
}

// ----------------------------------------------------------------------------
// Scan Stream
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ScannerState {
    generation: u64,
    /// Radio scan is open
    active: bool,
    abort: Option<AbortHandle>,
    /// Stops the radio when the window deadline passes
    deadline: Option<JoinHandle<()>>,
}

impl ScannerState {
    /// End the stream and deadline timer of the current window
    fn cancel_window(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}

/// Stops the radio scan for one scan window, unless a newer scan owns it
struct ScanRelease {
    radio: Arc<dyn RadioManager>,
    state: Arc<Mutex<ScannerState>>,
    generation: u64,
}

impl ScanRelease {
    async fn run(self) {
        let mut state = self.state.lock().await;
        if state.generation != self.generation || !state.active {
            return;
        }
        state.cancel_window();
        self.stop_radio(&mut state).await;
    }

    /// Runs on the deadline task itself, so its handle is detached rather
    /// than aborted
    async fn expire(self) {
        let mut state = self.state.lock().await;
        if state.generation != self.generation || !state.active {
            return;
        }
        state.deadline = None;
        if let Some(abort) = state.abort.take() {
            abort.abort();
        }
        debug!("Scan window {} reached its deadline", self.generation);
        self.stop_radio(&mut state).await;
    }

    async fn stop_radio(&self, state: &mut ScannerState) {
        state.active = false;
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
        debug!("Scan window {} closed", self.generation);
    }
}

/// Deduplicated devices from one scan window, in discovery order
///
/// Ends at the window deadline or when a newer scan starts. The radio scan
/// stops at the deadline whether or not the stream is still held. Call
/// [`ScanStream::close`] to stop it earlier; dropping the stream stops it in
/// the background.
pub struct ScanStream {
    inner: BoxStream<'static, DiscoveredDevice>,
    release: Option<ScanRelease>,
}

impl ScanStream {
    /// Stop the stream and the radio scan behind it
    pub async fn close(mut self) {
        if let Some(release) = self.release.take() {
            release.run().await;
        }
    }

    fn generation(&self) -> Option<u64> {
        self.release.as_ref().map(|release| release.generation)
    }
}

impl fmt::Debug for ScanStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanStream")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Stream for ScanStream {
    type Item = DiscoveredDevice;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(release.run());
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Discovery Scanner
// ----------------------------------------------------------------------------

/// Runs one scan window at a time over the shared radio
#[derive(Clone)]
pub struct DiscoveryScanner {
    radio: Arc<dyn RadioManager>,
    preflight: Arc<Preflight>,
    events: EventBus,
    matcher: ReceiverMatcher,
    state: Arc<Mutex<ScannerState>>,
}

impl DiscoveryScanner {
    pub fn new(
        radio: Arc<dyn RadioManager>,
        preflight: Arc<Preflight>,
        events: EventBus,
        matcher: ReceiverMatcher,
    ) -> Self {
        Self {
            radio,
            preflight,
            events,
            matcher,
            state: Arc::new(Mutex::new(ScannerState::default())),
        }
    }

    /// Open a scan window of `timeout`, stopping any scan already running
    pub async fn scan_all(&self, timeout: Duration) -> Result<ScanStream> {
        self.open_window(timeout, true).await
    }

    /// Every sighting is yielded unless `dedup` is set. `ScanDeviceObserved`
    /// fires once per device either way.
    async fn open_window(&self, timeout: Duration, dedup: bool) -> Result<ScanStream> {
        self.preflight.check(RadioOperation::Scan).await?;

        let mut state = self.state.lock().await;
        state.generation += 1;
        let generation = state.generation;

        state.cancel_window();
        if state.active {
            debug!("Stopping previous scan before starting a new one");
            state.active = false;
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Failed to stop previous BLE scan: {}", e);
            }
        }

        let devices = self.radio.start_scan().await?;
        state.active = true;

        let events = self.events.clone();
        let mut seen = HashSet::new();
        let fresh = devices.filter(move |device| {
            let first_sighting = seen.insert(device.id.clone());
            if first_sighting {
                debug!(
                    "Observed {} ({}) rssi={:?}",
                    device.name_or_unknown(),
                    device.id,
                    device.signal_strength
                );
                events.emit(EngineEvent::ScanDeviceObserved {
                    device: device.clone(),
                });
            }
            future::ready(first_sighting || !dedup)
        });
        // `sleep` saturates on durations past the end of the clock
        let (bounded, abort) = stream::abortable(fresh.take_until(sleep(timeout)));
        state.abort = Some(abort);

        let expiry = ScanRelease {
            radio: self.radio.clone(),
            state: self.state.clone(),
            generation,
        };
        state.deadline = Some(tokio::spawn(async move {
            sleep(timeout).await;
            expiry.expire().await;
        }));

        info!("Scan window {} open for {:?}", generation, timeout);
        Ok(ScanStream {
            inner: bounded.boxed(),
            release: Some(ScanRelease {
                radio: self.radio.clone(),
                state: self.state.clone(),
                generation,
            }),
        })
    }

    /// Scan until `predicate` matches or `timeout` elapses
    pub async fn scan<P>(&self, predicate: P, timeout: Duration) -> Result<ScanOutcome>
    where
        P: Fn(&DiscoveredDevice) -> bool + Send,
    {
        // Later sightings of a device can carry the name its first one lacked
        let mut devices = self.open_window(timeout, false).await?;
        let generation = devices.generation();

        let mut found = None;
        while let Some(device) = devices.next().await {
            if predicate(&device) {
                found = Some(device);
                break;
            }
        }

        let superseded = match generation {
            Some(generation) if found.is_none() => {
                self.state.lock().await.generation != generation
            }
            _ => false,
        };
        devices.close().await;

        match found {
            Some(device) => {
                info!("Found {} ({})", device.name_or_unknown(), device.id);
                self.events.emit(EngineEvent::ReceiverFound {
                    device: device.clone(),
                });
                Ok(ScanOutcome::Found(device))
            }
            None if superseded => Err(EngineError::Cancelled),
            None => {
                info!("No match within {:?}", timeout);
                self.events.emit(EngineEvent::ReceiverNotFound);
                Ok(ScanOutcome::NotFound)
            }
        }
    }

    /// Scan for the classroom receiver
    pub async fn scan_for_receiver(&self, timeout: Duration) -> Result<ScanOutcome> {
        let matcher = self.matcher.clone();
        self.scan(move |device| matcher.matches(device), timeout).await
    }

    /// Whether a scan window currently holds the radio
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    /// End the current scan window, if any
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.cancel_window();
        if state.active {
            state.active = false;
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
            info!("Scan stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionModel;
    use crate::testing::MockRadio;
    use tokio::time::Instant;

    fn scanner_for(radio: Arc<MockRadio>) -> (DiscoveryScanner, EventBus) {
        let events = EventBus::new(64);
        let preflight = Arc::new(Preflight::new(
            radio.clone(),
            PermissionModel::InstallTime,
            events.clone(),
        ));
        let scanner = DiscoveryScanner::new(radio, preflight, events.clone(), ReceiverMatcher::default());
        (scanner, events)
    }

    #[test]
    fn test_receiver_matching() {
        let matcher = ReceiverMatcher::default();

        assert!(matcher.matches(&DiscoveredDevice::new("a").with_name("ESP32_ATTENDANCE")));
        assert!(matcher.matches(&DiscoveredDevice::new("b").with_service(ATTENDANCE_SERVICE_UUID)));
        assert!(!matcher.matches(&DiscoveredDevice::new("c").with_name("Unknown")));
        assert!(!matcher.matches(&DiscoveredDevice::new("d")));

        // Case-sensitive, as advertised by the receiver firmware
        assert!(!matcher.matches(&DiscoveredDevice::new("e").with_name("esp32")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_reported_once() {
        let radio = Arc::new(
            MockRadio::new()
                .with_device(Duration::from_secs(1), DiscoveredDevice::new("AA").with_rssi(-70))
                .with_device(Duration::from_secs(2), DiscoveredDevice::new("AA").with_rssi(-60))
                .with_device(Duration::from_secs(3), DiscoveredDevice::new("BB")),
        );
        let (scanner, _events) = scanner_for(radio.clone());

        let stream = scanner.scan_all(Duration::from_secs(5)).await.unwrap();
        let ids: Vec<String> = stream.map(|d| d.id).collect().await;

        assert_eq!(ids, vec!["AA".to_string(), "BB".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_match_closes_scan() {
        let radio = Arc::new(
            MockRadio::new()
                .with_device(Duration::from_millis(500), DiscoveredDevice::new("1").with_name("Unknown"))
                .with_device(Duration::from_secs(2), DiscoveredDevice::new("2").with_name("ESP32_ATTENDANCE")),
        );
        let (scanner, _events) = scanner_for(radio.clone());

        let started = Instant::now();
        let outcome = scanner.scan_for_receiver(Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome.device().map(|d| d.id.as_str()), Some("2"));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!radio.is_scanning());
        assert!(!scanner.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_found() {
        let radio = Arc::new(
            MockRadio::new().with_device(Duration::from_secs(1), DiscoveredDevice::new("1").with_name("Phone")),
        );
        let (scanner, events) = scanner_for(radio.clone());
        let mut rx = events.subscribe();

        let started = Instant::now();
        let outcome = scanner.scan_for_receiver(Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome, ScanOutcome::NotFound);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!radio.is_scanning());
        assert_eq!(radio.scan_stops(), 1);

        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ScanDeviceObserved { .. }
        ));
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::ReceiverNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_scan_stops_previous() {
        let radio = Arc::new(MockRadio::new());
        let (scanner, _events) = scanner_for(radio.clone());

        let mut first = scanner.scan_all(Duration::from_secs(15)).await.unwrap();
        let second = scanner.scan_all(Duration::from_secs(15)).await.unwrap();

        // The aborted stream ends immediately
        assert!(first.next().await.is_none());
        assert_eq!(radio.scan_starts(), 2);
        assert_eq!(radio.scan_stops(), 1);

        // Closing the stale stream leaves the new scan running
        first.close().await;
        assert!(radio.is_scanning());

        second.close().await;
        assert!(!radio.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let radio = Arc::new(MockRadio::new());
        let (scanner, _events) = scanner_for(radio.clone());

        let mut stream = scanner.scan_all(Duration::from_secs(15)).await.unwrap();
        scanner.stop().await;

        assert!(stream.next().await.is_none());
        assert!(!radio.is_scanning());
        stream.close().await;
        assert_eq!(radio.scan_stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_named_in_later_sighting() {
        // Scan response carrying the name arrives after the bare advertisement
        let radio = Arc::new(
            MockRadio::new()
                .with_device(Duration::from_secs(1), DiscoveredDevice::new("24:0A"))
                .with_device(
                    Duration::from_secs(2),
                    DiscoveredDevice::new("24:0A").with_name("ESP32_ATTENDANCE"),
                ),
        );
        let (scanner, events) = scanner_for(radio.clone());
        let mut rx = events.subscribe();

        let outcome = scanner.scan_for_receiver(Duration::from_secs(5)).await.unwrap();

        let device = outcome.device().unwrap();
        assert_eq!(device.id, "24:0A");
        assert_eq!(device.display_name.as_deref(), Some("ESP32_ATTENDANCE"));
        assert!(!radio.is_scanning());

        // Observation is still reported once per device
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ScanDeviceObserved { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ReceiverFound { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_stops_at_deadline_while_stream_held() {
        let radio = Arc::new(
            MockRadio::new().with_device(Duration::from_secs(1), DiscoveredDevice::new("AA")),
        );
        let (scanner, _events) = scanner_for(radio.clone());

        let mut stream = scanner.scan_all(Duration::from_secs(5)).await.unwrap();
        while stream.next().await.is_some() {}

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!radio.is_scanning());
        assert!(!scanner.is_active().await);
        assert_eq!(radio.scan_stops(), 1);

        // Closing afterwards does not stop the radio twice
        stream.close().await;
        assert_eq!(radio.scan_stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_panic() {
        let radio = Arc::new(MockRadio::new().with_device(
            Duration::from_secs(1),
            DiscoveredDevice::new("AA").with_name("ESP32_ATTENDANCE"),
        ));
        let (scanner, _events) = scanner_for(radio.clone());

        let outcome = scanner.scan_for_receiver(Duration::MAX).await.unwrap();
        assert!(outcome.is_found());

        let stream = scanner.scan_all(Duration::from_secs(u64::MAX)).await.unwrap();
        assert!(radio.is_scanning());
        stream.close().await;
        assert!(!radio.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_scan_is_cancelled() {
        let radio = Arc::new(MockRadio::new());
        let (scanner, _events) = scanner_for(radio.clone());

        let pending = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.scan_for_receiver(Duration::from_secs(10)).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scanner.is_active().await);

        let newer = scanner.scan_all(Duration::from_secs(15)).await.unwrap();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(EngineError::Cancelled)));

        // The newer window keeps the radio
        assert!(radio.is_scanning());
        newer.close().await;
        assert!(!radio.is_scanning());
    }
}
