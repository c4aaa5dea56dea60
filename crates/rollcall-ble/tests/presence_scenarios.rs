//! Scenario tests for the presence engine
//!
//! These drive the engine end to end over the in-memory radio with a paused
//! tokio clock, covering session replacement, cancellation, scan bounds,
//! role preemption, and check-in.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rollcall_ble::testing::MockRadio;
use rollcall_ble::*;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn engine_with(radio: &Arc<MockRadio>, config: EngineConfig) -> PresenceEngine {
    PresenceEngine::new(
        radio.clone(),
        Arc::new(ManualTimeSource::starting_at(1_700_000_000_000)),
        config,
    )
    .unwrap()
}

fn student(id: &str) -> BeaconIdentity {
    BeaconIdentity::new(id, "John Doe").unwrap()
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ticks_for(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::AdvertisingLivenessTick { identity } => {
                Some(identity.subject_id().to_string())
            }
            _ => None,
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Advertising
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_start_replaces_previous_session() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    assert_ok!(engine.start_advertising(student("111")).await);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_ok!(engine.start_advertising(student("222")).await);
    drain(&mut rx);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let ticks = ticks_for(&drain(&mut rx));
    assert!(!ticks.is_empty());
    assert!(ticks.iter().all(|id| id == "222"), "stale ticks: {:?}", ticks);

    let status = engine.advertising_status().await;
    assert_eq!(status.identity, Some(student("222")));
    assert_eq!(status.mode, AdvertisingMode::Active);
    assert_eq!(radio.last_advertisement().unwrap().local_name, "STUDENT_222");
    assert!(radio.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_inactive_is_noop() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    engine.stop_advertising().await;
    engine.stop_advertising().await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_granted_and_powered_on_ticks_within_one_interval() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let mode = engine.start_advertising(student("12345")).await.unwrap();
    assert!(mode.is_live());

    let started = Instant::now();
    loop {
        match rx.recv().await.unwrap() {
            EngineEvent::AdvertisingLivenessTick { identity } => {
                assert_eq!(identity.subject_id(), "12345");
                break;
            }
            _ => continue,
        }
    }
    assert!(started.elapsed() <= engine.config().liveness_interval());
}

#[tokio::test(start_paused = true)]
async fn test_degraded_never_claims_active() {
    let radio = Arc::new(MockRadio::new().with_peripheral_support(PeripheralSupport::CentralOnly));
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let mode = engine.start_advertising(student("12345")).await.unwrap();
    assert_eq!(mode, AdvertisingMode::Degraded);

    tokio::time::sleep(Duration::from_secs(7)).await;
    let events = drain(&mut rx);
    assert!(events.contains(&EngineEvent::AdvertisingStarted {
        mode: AdvertisingMode::Degraded
    }));
    assert!(!events.contains(&EngineEvent::AdvertisingStarted {
        mode: AdvertisingMode::Active
    }));
    assert_eq!(ticks_for(&events).len(), 2);
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Degraded);
    assert!(!radio.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_missing_advertise_permission() {
    let radio = Arc::new(
        MockRadio::new().with_grants(PermissionSet::all_granted().with(Capability::Advertise, false)),
    );
    let config = EngineConfig::default().with_permission_model(PermissionModel::Runtime);
    let engine = engine_with(&radio, config);
    let mut rx = engine.subscribe();

    let err = assert_err!(engine.start_advertising(student("12345")).await);
    assert_eq!(
        err,
        EngineError::PermissionDenied {
            missing: vec![Capability::Advertise]
        }
    );
    assert!(err.is_user_recoverable());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(ticks_for(&drain(&mut rx)).is_empty());
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Inactive);
    assert_eq!(radio.advertising_starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_inflight_start() {
    let radio = Arc::new(MockRadio::new().with_advertise_delay(Duration::from_secs(1)));
    let engine = Arc::new(engine_with(&radio, EngineConfig::default()));

    let starting = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start_advertising(student("12345")).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Starting);
    engine.stop_advertising().await;

    let result = starting.await.unwrap();
    assert_eq!(result, Err(EngineError::Cancelled));
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Inactive);
    assert!(!radio.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_attendance_scheme_advertisement() {
    let radio = Arc::new(MockRadio::new());
    let config = EngineConfig::default().with_beacon_scheme(BeaconScheme::Attendance);
    let engine = engine_with(&radio, config);

    assert_ok!(engine.start_advertising(student("12345")).await);

    let advertised = radio.last_advertisement().unwrap();
    assert_eq!(advertised.local_name, "ATT_12345");
    assert!(!advertised.connectable);
    assert_eq!(advertised.manufacturer_data, None);
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_receiver_found_early() {
    let radio = Arc::new(
        MockRadio::new()
            .with_device(Duration::ZERO, DiscoveredDevice::new("11:11").with_name("Unknown"))
            .with_device(
                Duration::from_secs(2),
                DiscoveredDevice::new("24:0A:C4:12:34:56").with_name("ESP32_ATTENDANCE"),
            ),
    );
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let started = Instant::now();
    let outcome = engine
        .scan_for_receiver(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2_100));
    assert_eq!(outcome.device().unwrap().id, "24:0A:C4:12:34:56");
    assert!(!radio.is_scanning());

    let events = drain(&mut rx);
    assert_eq!(
        events.last(),
        Some(&EngineEvent::ReceiverFound {
            device: DiscoveredDevice::new("24:0A:C4:12:34:56").with_name("ESP32_ATTENDANCE"),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_receiver_not_found_at_timeout() {
    let radio = Arc::new(
        MockRadio::new()
            .with_device(Duration::from_secs(1), DiscoveredDevice::new("11:11").with_name("Headphones"))
            .with_device(Duration::from_secs(3), DiscoveredDevice::new("22:22")),
    );
    let engine = engine_with(&radio, EngineConfig::default());

    let started = Instant::now();
    let outcome = engine
        .scan_for_receiver(Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(outcome, ScanOutcome::NotFound);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_millis(5_100));
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_service_uuid_identifies_receiver() {
    let radio = Arc::new(MockRadio::new().with_device(
        Duration::from_secs(1),
        DiscoveredDevice::new("33:33").with_service(ATTENDANCE_SERVICE_UUID),
    ));
    let engine = engine_with(&radio, EngineConfig::default());

    let outcome = engine.scan_for_receiver(None).await.unwrap();
    assert!(outcome.is_found());
}

#[tokio::test(start_paused = true)]
async fn test_scan_all_reports_each_device_once() {
    let radio = Arc::new(
        MockRadio::new()
            .with_device(Duration::from_secs(1), DiscoveredDevice::new("AA").with_name("STUDENT_1"))
            .with_device(Duration::from_secs(2), DiscoveredDevice::new("BB"))
            .with_device(Duration::from_secs(4), DiscoveredDevice::new("AA").with_name("STUDENT_1"))
            .with_device(Duration::from_secs(20), DiscoveredDevice::new("CC")),
    );
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let started = Instant::now();
    let stream = engine.scan_all(None).await.unwrap();
    let devices: Vec<DiscoveredDevice> = stream.collect().await;

    // Default window is 15 s, so CC at 20 s is never seen
    assert!(started.elapsed() >= Duration::from_secs(15));
    let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["AA", "BB"]);
    assert_eq!(devices[0].beacon_subject_id(), Some("1"));

    let observed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::ScanDeviceObserved { .. }))
        .count();
    assert_eq!(observed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_scan_without_location_is_denied() {
    let radio = Arc::new(MockRadio::new().with_grants(PermissionSet::from_grants([
        (Capability::Scan, true),
        (Capability::Connect, true),
        (Capability::Advertise, true),
    ])));
    let config = EngineConfig::default().with_permission_model(PermissionModel::Runtime);
    let engine = engine_with(&radio, config);

    let err = assert_err!(engine.scan_for_receiver(None).await);
    assert_eq!(
        err,
        EngineError::PermissionDenied {
            missing: vec![Capability::FineLocation]
        }
    );
    assert_eq!(radio.scan_starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_with_radio_off() {
    let radio = Arc::new(MockRadio::new());
    radio.set_state(RadioState::PoweredOff);
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let err = assert_err!(engine.scan_all(None).await);
    assert_eq!(
        err,
        EngineError::RadioNotReady {
            state: RadioState::PoweredOff
        }
    );
    assert_eq!(
        drain(&mut rx),
        vec![EngineEvent::RadioNotReady {
            state: RadioState::PoweredOff
        }]
    );
}

// ----------------------------------------------------------------------------
// Role Policy
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_exclusive_scan_preempts_active_advertising() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());

    assert_eq!(
        engine.start_advertising(student("12345")).await,
        Ok(AdvertisingMode::Active)
    );
    assert_ok!(engine.scan_for_receiver(Some(Duration::from_secs(1))).await);

    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Inactive);
    assert!(!radio.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_exclusive_scan_keeps_degraded_advertising() {
    let radio = Arc::new(MockRadio::new().with_peripheral_support(PeripheralSupport::CentralOnly));
    let engine = engine_with(&radio, EngineConfig::default());

    assert_ok!(engine.start_advertising(student("12345")).await);
    assert_ok!(engine.scan_for_receiver(Some(Duration::from_secs(1))).await);

    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_policy_keeps_both_roles() {
    let radio = Arc::new(MockRadio::new());
    let config = EngineConfig::default().with_role_policy(RolePolicy::Concurrent);
    let engine = engine_with(&radio, config);

    assert_ok!(engine.start_advertising(student("12345")).await);
    let stream = engine.scan_all(Some(Duration::from_secs(5))).await.unwrap();

    assert!(radio.is_scanning());
    assert!(radio.is_advertising());
    stream.close().await;
    assert_eq!(engine.advertising_status().await.mode, AdvertisingMode::Active);
}

#[tokio::test(start_paused = true)]
async fn test_advertising_stops_active_scan() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());

    let mut stream = engine.scan_all(None).await.unwrap();
    assert!(radio.is_scanning());

    assert_ok!(engine.start_advertising(student("12345")).await);
    assert!(!radio.is_scanning());
    assert!(stream.next().await.is_none());
    stream.close().await;
}

// ----------------------------------------------------------------------------
// Check-in
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_find_and_check_in() {
    let radio = Arc::new(MockRadio::new().with_device(
        Duration::from_secs(1),
        DiscoveredDevice::new("24:0A:C4:12:34:56").with_name("ESP32_ATTENDANCE"),
    ));
    let engine = engine_with(&radio, EngineConfig::default());
    let mut rx = engine.subscribe();

    let outcome = engine
        .find_and_check_in(&student("12345"), None)
        .await
        .unwrap();
    assert!(outcome.is_found());

    let writes = radio.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].device_id, "24:0A:C4:12:34:56");
    assert_eq!(writes[0].characteristic, CHECK_IN_CHARACTERISTIC_UUID);
    assert_eq!(writes[0].value, b"12345".to_vec());

    assert!(drain(&mut rx).contains(&EngineEvent::CheckInDelivered {
        device_id: "24:0A:C4:12:34:56".to_string(),
        subject_id: "12345".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_no_receiver_means_no_check_in() {
    let radio = Arc::new(MockRadio::new());
    let engine = engine_with(&radio, EngineConfig::default());

    let outcome = engine
        .find_and_check_in(&student("12345"), Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(outcome, ScanOutcome::NotFound);
    assert!(radio.writes().is_empty());
}
