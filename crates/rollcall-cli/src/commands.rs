//! Command handlers for the rollcall CLI

use std::future;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use rollcall_ble::{
    BeaconIdentity, DiscoveredDevice, EngineEvent, PresenceEngine, ScanOutcome,
};

use crate::cli::{Commands, IdentityArgs};
use crate::config::AppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against a running engine
    pub async fn execute(
        command: Commands,
        engine: &PresenceEngine,
        config: &AppConfig,
        json: bool,
    ) -> Result<()> {
        match command {
            Commands::Advertise { identity, duration } => {
                let identity = Self::resolve_identity(config, &identity)?;
                Self::handle_advertise_command(engine, identity, duration.map(Duration::from_secs), json)
                    .await
            }
            Commands::FindReceiver {
                timeout,
                check_in,
                identity,
            } => {
                let identity = if check_in {
                    Some(Self::resolve_identity(config, &identity)?)
                } else {
                    None
                };
                Self::handle_find_receiver_command(
                    engine,
                    timeout.map(Duration::from_secs),
                    identity,
                    json,
                )
                .await
            }
            Commands::ScanAll { timeout } => {
                Self::handle_scan_all_command(engine, timeout.map(Duration::from_secs), json).await
            }
            Commands::CheckIn { device, identity } => {
                let identity = Self::resolve_identity(config, &identity)?;
                Self::handle_check_in_command(engine, &device, &identity, json).await
            }
            Commands::Status => Self::handle_status_command(engine, json).await,
            Commands::ExampleConfig { output } => {
                Self::handle_example_config_command(output.as_deref())
            }
        }
    }

    /// Handle the example-config command; needs no radio
    pub fn handle_example_config_command(output: Option<&str>) -> Result<()> {
        match output {
            Some(path) => {
                AppConfig::example().save_to_file(path)?;
                info!("Example configuration written to {}", path);
            }
            None => println!("{}", AppConfig::example_config()),
        }
        Ok(())
    }

    fn resolve_identity(config: &AppConfig, args: &IdentityArgs) -> Result<BeaconIdentity> {
        Ok(config.beacon_identity(args.id.as_deref(), args.name.as_deref())?)
    }

    /// Handle the advertise command
    async fn handle_advertise_command(
        engine: &PresenceEngine,
        identity: BeaconIdentity,
        duration: Option<Duration>,
        json: bool,
    ) -> Result<()> {
        let mut events = engine.subscribe();
        let mode = engine.start_advertising(identity.clone()).await?;
        if !json {
            println!("Advertising {} ({:?}). Press Ctrl+C to stop.", identity, mode);
        }

        let stop_after = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(stop_after);

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => Self::print_event(&event, json)?,
                    Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                    Err(RecvError::Closed) => break Ok(()),
                },
                signal = tokio::signal::ctrl_c() => {
                    break signal.context("Failed to listen for Ctrl+C");
                }
                _ = &mut stop_after => break Ok(()),
            }
        };

        engine.stop_advertising().await;
        info!("Advertising session ended");
        outcome?;
        Ok(())
    }

    /// Handle the find-receiver command
    async fn handle_find_receiver_command(
        engine: &PresenceEngine,
        timeout: Option<Duration>,
        check_in: Option<BeaconIdentity>,
        json: bool,
    ) -> Result<()> {
        let outcome = match &check_in {
            Some(identity) => engine.find_and_check_in(identity, timeout).await?,
            None => engine.scan_for_receiver(timeout).await?,
        };

        match (&outcome, json) {
            (ScanOutcome::Found(device), true) => Self::print_json(&json!({
                "found": true,
                "device": device,
                "checked_in": check_in.is_some(),
            }))?,
            (ScanOutcome::NotFound, true) => Self::print_json(&json!({ "found": false }))?,
            (ScanOutcome::Found(device), false) => {
                println!("Receiver found: {}", Self::describe_device(device));
                if let Some(identity) = &check_in {
                    println!("Checked in as {}", identity);
                }
            }
            (ScanOutcome::NotFound, false) => println!("Receiver not found"),
        }
        Ok(())
    }

    /// Handle the scan-all command
    async fn handle_scan_all_command(
        engine: &PresenceEngine,
        timeout: Option<Duration>,
        json: bool,
    ) -> Result<()> {
        let mut devices = engine.scan_all(timeout).await?;
        let mut count = 0usize;

        let outcome = loop {
            tokio::select! {
                device = devices.next() => match device {
                    Some(device) => {
                        count += 1;
                        if json {
                            Self::print_json(&device)?;
                        } else {
                            println!("{:>3}. {}", count, Self::describe_device(&device));
                        }
                    }
                    None => break Ok(()),
                },
                signal = tokio::signal::ctrl_c() => {
                    break signal.context("Failed to listen for Ctrl+C");
                }
            }
        };

        devices.close().await;
        outcome?;
        if !json {
            println!("{} device(s) seen", count);
        }
        Ok(())
    }

    /// Handle the check-in command
    async fn handle_check_in_command(
        engine: &PresenceEngine,
        device: &str,
        identity: &BeaconIdentity,
        json: bool,
    ) -> Result<()> {
        engine.check_in(device, identity).await?;
        if json {
            Self::print_json(&json!({
                "checked_in": true,
                "device_id": device,
                "subject_id": identity.subject_id(),
            }))?;
        } else {
            println!("Checked in {} at {}", identity, device);
        }
        Ok(())
    }

    /// Handle the status command
    async fn handle_status_command(engine: &PresenceEngine, json: bool) -> Result<()> {
        let state = engine.radio_state().await;
        let ready = engine.is_ready().await;
        let permissions = engine.request_permissions().await;
        let session = engine.advertising_status().await;

        if json {
            return Self::print_json(&json!({
                "radio_state": state,
                "ready": ready,
                "permissions": permissions,
                "advertising": session,
            }));
        }

        println!("Rollcall Status");
        println!("===============");
        println!("Radio state: {:?} ({})", state, if ready { "ready" } else { "not ready" });
        println!("Permissions:");
        for (capability, granted) in permissions.iter() {
            println!("  {:<16} {}", format!("{:?}", capability), if granted { "granted" } else { "denied" });
        }
        println!("Advertising: {:?}", session.mode);
        println!("Beacon scheme: {:?}", engine.config().beacon_scheme);
        println!("Role policy: {:?}", engine.config().role_policy);
        Ok(())
    }

    fn print_event(event: &EngineEvent, json: bool) -> Result<()> {
        if json {
            return Self::print_json(event);
        }
        match event {
            EngineEvent::AdvertisingStarted { mode } => println!("Advertising started ({:?})", mode),
            EngineEvent::AdvertisingLivenessTick { identity } => {
                println!("Beacon alive: {}", identity)
            }
            EngineEvent::AdvertisingStopped => println!("Advertising stopped"),
            EngineEvent::PermissionDenied { missing } => {
                println!("Permission denied, missing {:?}", missing)
            }
            EngineEvent::RadioNotReady { state } => println!("Radio not ready ({:?})", state),
            other => println!("{:?}", other),
        }
        Ok(())
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    fn describe_device(device: &DiscoveredDevice) -> String {
        let mut line = format!("{} [{}]", device.name_or_unknown(), device.id);
        if let Some(rssi) = device.signal_strength {
            line.push_str(&format!(" rssi={}dBm", rssi));
        }
        if let Some(subject) = device.beacon_subject_id() {
            line.push_str(&format!(" subject={}", subject));
        }
        if let Some(data) = device.manufacturer_hex() {
            line.push_str(&format!(" data={}", data));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rollcall_ble::testing::MockRadio;
    use rollcall_ble::{EngineConfig, ManualTimeSource, CHECK_IN_CHARACTERISTIC_UUID};
    use tokio_test::assert_ok;

    fn engine_with(radio: &Arc<MockRadio>) -> PresenceEngine {
        PresenceEngine::new(
            radio.clone(),
            Arc::new(ManualTimeSource::default()),
            EngineConfig::default(),
        )
        .unwrap()
    }

    fn config_with_identity() -> AppConfig {
        let mut config = AppConfig::default();
        config.identity.subject_id = Some("12345".to_string());
        config.identity.subject_label = Some("John Doe".to_string());
        config
    }

    #[tokio::test]
    async fn test_check_in_command_uses_configured_identity() {
        let radio = Arc::new(MockRadio::new());
        let engine = engine_with(&radio);

        let command = Commands::CheckIn {
            device: "24:0A:C4:12:34:56".to_string(),
            identity: IdentityArgs::default(),
        };
        assert_ok!(CommandDispatcher::execute(command, &engine, &config_with_identity(), true).await);

        let writes = radio.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].characteristic, CHECK_IN_CHARACTERISTIC_UUID);
        assert_eq!(writes[0].value, b"12345".to_vec());
    }

    #[tokio::test]
    async fn test_advertise_without_identity_fails() {
        let radio = Arc::new(MockRadio::new());
        let engine = engine_with(&radio);

        let command = Commands::Advertise {
            identity: IdentityArgs::default(),
            duration: Some(1),
        };
        let result = CommandDispatcher::execute(command, &engine, &AppConfig::default(), false).await;
        assert!(matches!(result, Err(crate::CliError::Config(_))));
        assert_eq!(radio.advertising_starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertise_for_duration() {
        let radio = Arc::new(MockRadio::new());
        let engine = engine_with(&radio);

        let command = Commands::Advertise {
            identity: IdentityArgs {
                id: Some("777".to_string()),
                name: None,
            },
            duration: Some(5),
        };
        assert_ok!(CommandDispatcher::execute(command, &engine, &config_with_identity(), true).await);

        assert_eq!(radio.last_advertisement().unwrap().local_name, "STUDENT_777");
        assert!(!radio.is_advertising());
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_receiver_with_check_in() {
        let radio = Arc::new(MockRadio::new().with_device(
            Duration::from_secs(1),
            DiscoveredDevice::new("AA").with_name("ESP32_ATTENDANCE"),
        ));
        let engine = engine_with(&radio);

        let command = Commands::FindReceiver {
            timeout: Some(5),
            check_in: true,
            identity: IdentityArgs::default(),
        };
        assert_ok!(CommandDispatcher::execute(command, &engine, &config_with_identity(), false).await);
        assert_eq!(radio.writes().len(), 1);
        assert!(!radio.is_scanning());
    }

    #[tokio::test]
    async fn test_example_config_written_to_file() {
        let radio = Arc::new(MockRadio::new());
        let engine = engine_with(&radio);
        let path = std::env::temp_dir()
            .join(format!("rollcall-example-test-{}", std::process::id()))
            .join("config.toml");

        let command = Commands::ExampleConfig {
            output: Some(path.to_string_lossy().into_owned()),
        };
        assert_ok!(CommandDispatcher::execute(command, &engine, &AppConfig::default(), false).await);

        let written = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(written, AppConfig::example());
        assert_eq!(radio.capability_requests(), 0);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_status_command() {
        let radio = Arc::new(MockRadio::new());
        let engine = engine_with(&radio);

        assert_ok!(CommandDispatcher::execute(Commands::Status, &engine, &AppConfig::default(), true).await);
    }
}
