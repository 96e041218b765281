//! Host-based tests for the OTA agent
//! These drive the full update cycle on the development machine against
//! scripted backend and flash doubles, not on the ESP32

pub mod doubles;

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use ota_core::checksum::sha256_hex;
    use ota_core::transport::UPDATE_STATUS_PATH;
    use ota_core::{
        CheckError, CycleOutcome, ForceCheckError, OtaEvent, OtaState, OtaWorker, ParseError, SessionActive,
        TransportError, UpdateError, UpdateStateMachine, UpdateStatus,
    };
    use proptest::prelude::*;

    use crate::doubles::*;

    const DECILES: [u8; 11] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

    fn offering(size: usize, checksum: &str, is_delta: bool) -> ScriptedBackend {
        ScriptedBackend::offering(
            manifest_json("1.1.0", size, checksum, is_delta),
            Image::pattern(size),
        )
    }

    fn assert_no_restart(machine: &TestMachine) {
        assert!(machine.system().scheduled.is_empty());
        assert!(!machine
            .events()
            .iter()
            .any(|e| matches!(e, OtaEvent::RestartScheduled { .. })));
    }

    #[test]
    fn test_full_update_succeeds() {
        let mut machine = machine(offering(204_800, "abcd", false), MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Installed {
                version: "1.1.0".into()
            }
        );

        assert_eq!(progress(machine.events()), DECILES);
        assert_eq!(
            states(machine.events()),
            [
                OtaState::Checking,
                OtaState::Downloading,
                OtaState::Installing,
                OtaState::Success
            ]
        );

        let reports = machine.transport().status_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, UpdateStatus::Success);
        assert!(reports[0].message.contains("1.1.0"));
        assert_eq!(reports[0].device_id, DEVICE_ID);
        assert_eq!(reports[0].current_version, CURRENT_VERSION);

        assert_eq!(machine.system().scheduled, [Duration::from_secs(5)]);
        assert!(machine.events().contains(&OtaEvent::RestartScheduled {
            delay: Duration::from_secs(5)
        }));

        let slot = machine.slot();
        assert!(slot.finalized);
        assert!(!slot.aborted);
        assert_eq!(slot.data, Image::pattern(204_800).data);
        assert_eq!(machine.state(), OtaState::Success);
        assert!(machine.restart_pending());
        assert_eq!(machine.session().map(|s| s.bytes_written()), Some(204_800));
    }

    #[test]
    fn test_no_new_session_while_restart_pending() {
        let start = Instant::now();
        let mut machine = machine(offering(20_000, "abcd", false), MemorySlot::default());

        assert!(matches!(
            machine.force_check(start),
            Ok(CycleOutcome::Installed { .. })
        ));
        let requests = machine.transport().requests.len();

        // The backend still offers the same image, since the running version
        // only changes after the restart.
        assert_eq!(
            machine.force_check(start + Duration::from_secs(1)),
            Err(SessionActive {
                state: OtaState::Success
            })
        );
        assert_eq!(machine.tick(start + Duration::from_secs(2 * 3600)), None);

        assert_eq!(machine.state(), OtaState::Success);
        assert_eq!(machine.transport().requests.len(), requests);
        assert_eq!(machine.slot().sessions_begun, 1);
        assert_eq!(machine.system().scheduled.len(), 1);
    }

    #[test]
    fn test_delta_reports_fallback_before_download() {
        let mut machine = machine(offering(204_800, "abcd", true), MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Installed {
                version: "1.1.0".into()
            }
        );

        let backend = machine.transport();
        assert_eq!(
            backend.reported_statuses(),
            [UpdateStatus::DeltaNotSupported, UpdateStatus::Success]
        );
        assert_eq!(
            backend.status_reports()[0].message,
            "Falling back to full update"
        );

        let fallback = backend
            .position(|r| r.url.ends_with(UPDATE_STATUS_PATH))
            .unwrap();
        let download = backend.position(|r| r.method == Method::Get).unwrap();
        assert!(fallback < download);

        // Same install path as a full image.
        assert_eq!(progress(machine.events()), DECILES);
        assert_eq!(machine.system().scheduled, [Duration::from_secs(5)]);
        assert!(machine.slot().finalized);
    }

    #[test]
    fn test_truncated_download() {
        let mut backend = offering(100_000, "abcd", false);
        backend.image.truncate_at = Some(50_000);
        let mut machine = machine(backend, MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::UpdateFailed(UpdateError::Download(
                "Stream ended after 50000 of 100000 bytes".into()
            ))
        );
        assert_eq!(machine.state(), OtaState::Error);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::DownloadFailed]
        );
        assert!(machine.slot().aborted);
        assert!(!machine.slot().finalized);
        assert_eq!(machine.slot().data.len(), 50_000);
        assert_eq!(progress(machine.events()).last(), Some(&50));
        assert_no_restart(&machine);
    }

    #[test]
    fn test_short_write_aborts_session() {
        let slot = MemorySlot {
            short_write_on: Some(3),
            ..MemorySlot::default()
        };
        let mut machine = machine(offering(20_000, "abcd", false), slot);

        let outcome = machine.force_check(Instant::now()).unwrap();
        match outcome {
            CycleOutcome::UpdateFailed(UpdateError::Install(message)) => {
                assert!(message.starts_with("Write error"), "{message}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // No write was attempted after the mismatch.
        assert_eq!(machine.slot().write_calls, 3);
        assert!(machine.slot().aborted);
        assert!(!machine.slot().finalized);
        assert_eq!(machine.state(), OtaState::Error);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::InstallFailed]
        );
        assert_no_restart(&machine);
    }

    #[test]
    fn test_finalize_failure_is_not_success() {
        let slot = MemorySlot {
            fail_finalize: true,
            ..MemorySlot::default()
        };
        let mut machine = machine(offering(10_000, "abcd", false), slot);

        let outcome = machine.force_check(Instant::now()).unwrap();
        match outcome {
            CycleOutcome::UpdateFailed(UpdateError::Install(message)) => {
                assert!(message.starts_with("Finalization error"), "{message}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(machine.slot().data.len(), 10_000);
        assert!(!states(machine.events()).contains(&OtaState::Success));
        assert_eq!(machine.state(), OtaState::Error);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::InstallFailed]
        );
        assert_no_restart(&machine);
    }

    #[test]
    fn test_force_check_outside_idle_is_noop() {
        let mut backend = offering(10_000, "abcd", false);
        backend.image.status = 404;
        let mut machine = machine(backend, MemorySlot::default());

        machine.force_check(Instant::now()).unwrap();
        assert_eq!(machine.state(), OtaState::Error);

        let requests = machine.transport().requests.len();
        let events = machine.events().len();

        assert_eq!(
            machine.force_check(Instant::now()),
            Err(SessionActive {
                state: OtaState::Error
            })
        );
        assert_eq!(machine.state(), OtaState::Error);
        assert_eq!(machine.transport().requests.len(), requests);
        assert_eq!(machine.events().len(), events);
        assert_eq!(machine.slot().sessions_begun, 0);
    }

    #[test]
    fn test_error_settles_to_idle_on_next_tick() {
        let mut backend = offering(10_000, "abcd", false);
        backend.check = CheckReply::Respond(500, "internal error".into());
        let start = Instant::now();
        let mut machine = machine_with(test_config(), backend, MemorySlot::default(), start);

        assert_eq!(
            machine.tick(start),
            Some(CycleOutcome::CheckFailed(CheckError::UnexpectedStatus(500)))
        );
        assert_eq!(machine.state(), OtaState::Error);

        let report = &machine.transport().status_reports()[0];
        assert_eq!(report.status, UpdateStatus::DownloadFailed);
        assert!(report.message.starts_with("Update check failed"));

        // Settles without starting a new cycle before the interval.
        assert_eq!(machine.tick(start + Duration::from_secs(1)), None);
        assert_eq!(machine.state(), OtaState::Idle);

        let checks = machine.transport().requests.len();
        assert!(machine
            .tick(start + Duration::from_secs(3601))
            .is_some());
        assert!(machine.transport().requests.len() > checks);
    }

    #[test]
    fn test_incomplete_manifest_never_downloads() {
        for field in ["version", "url", "size", "checksum"] {
            let mut manifest = manifest_json("1.1.0", 10_000, "abcd", false);
            manifest.as_object_mut().unwrap().remove(field);
            let backend = ScriptedBackend::offering(manifest, Image::pattern(10_000));
            let mut machine = machine(backend, MemorySlot::default());

            let outcome = machine.force_check(Instant::now()).unwrap();
            assert_eq!(
                outcome,
                CycleOutcome::CheckFailed(CheckError::Manifest(ParseError::MissingField(field)))
            );
            assert!(!states(machine.events()).contains(&OtaState::Downloading));
            assert_eq!(machine.transport().image_requests(), 0);
            assert_eq!(machine.slot().sessions_begun, 0);
            assert_eq!(
                machine.transport().reported_statuses(),
                [UpdateStatus::DownloadFailed]
            );
        }
    }

    #[test]
    fn test_offline_skips_cycle() {
        let mut backend = offering(10_000, "abcd", false);
        backend.connected = false;
        let mut machine = machine(backend, MemorySlot::default());

        assert_eq!(machine.tick(Instant::now()), Some(CycleOutcome::Offline));
        assert_eq!(machine.state(), OtaState::Idle);
        assert!(machine.transport().requests.is_empty());
        assert!(machine.events().is_empty());
    }

    #[test]
    fn test_connection_error_during_check_returns_to_idle() {
        let mut backend = offering(10_000, "abcd", false);
        backend.check = CheckReply::Fail(TransportError::Connection("reset by peer".into()));
        let mut machine = machine(backend, MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::CheckFailed(CheckError::Transport(_))
        ));
        assert_eq!(
            states(machine.events()),
            [OtaState::Checking, OtaState::Idle]
        );
        assert!(machine.transport().status_reports().is_empty());
    }

    #[test]
    fn test_up_to_date() {
        let mut machine = machine(ScriptedBackend::up_to_date(), MemorySlot::default());
        assert_eq!(
            machine.force_check(Instant::now()),
            Ok(CycleOutcome::UpToDate)
        );
        assert_eq!(machine.state(), OtaState::Idle);
        assert_eq!(machine.transport().image_requests(), 0);
    }

    #[test]
    fn test_check_waits_for_interval() {
        let config = ota_core::OtaConfig {
            check_on_start: false,
            ..test_config()
        };
        let start = Instant::now();
        let mut machine =
            machine_with(config, ScriptedBackend::up_to_date(), MemorySlot::default(), start);

        assert_eq!(machine.tick(start + Duration::from_secs(10)), None);
        assert!(machine.transport().requests.is_empty());
        assert_eq!(
            machine.tick(start + Duration::from_secs(3600)),
            Some(CycleOutcome::UpToDate)
        );
        assert_eq!(machine.tick(start + Duration::from_secs(3700)), None);
    }

    #[test]
    fn test_declared_length_mismatch_fails_before_writing() {
        let mut backend = offering(204_800, "abcd", false);
        backend.image.content_length = Some(1000);
        let mut machine = machine(backend, MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::UpdateFailed(UpdateError::Download(_))
        ));
        assert_eq!(machine.slot().sessions_begun, 0);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::DownloadFailed]
        );
    }

    #[test]
    fn test_image_too_large_for_partition() {
        let slot = MemorySlot {
            capacity: 4096,
            ..MemorySlot::default()
        };
        let mut machine = machine(offering(10_000, "abcd", false), slot);

        match machine.force_check(Instant::now()).unwrap() {
            CycleOutcome::UpdateFailed(UpdateError::Install(message)) => {
                assert!(message.starts_with("Not enough space"), "{message}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::InstallFailed]
        );
    }

    #[test]
    fn test_stalled_download_times_out() {
        let mut backend = offering(50_000, "abcd", false);
        backend.image.stall_at = Some(20_000);
        let mut machine = machine(backend, MemorySlot::default());

        let outcome = machine.force_check(Instant::now()).unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::UpdateFailed(UpdateError::Download(_))
        ));
        assert!(machine.slot().aborted);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::DownloadFailed]
        );
    }

    #[test]
    fn test_matching_sha256_is_installed() {
        let image = Image::pattern(30_000);
        let digest = sha256_hex(&image.data);
        let backend = ScriptedBackend::offering(
            manifest_json("1.1.0", 30_000, &format!("sha256:{digest}"), false),
            image,
        );
        let mut machine = machine(backend, MemorySlot::default());

        assert!(matches!(
            machine.force_check(Instant::now()),
            Ok(CycleOutcome::Installed { .. })
        ));
        assert!(machine.slot().finalized);
    }

    #[test]
    fn test_sha256_mismatch_is_never_finalized() {
        let wrong = sha256_hex(b"some other image");
        let mut machine = machine(offering(30_000, &wrong, false), MemorySlot::default());

        match machine.force_check(Instant::now()).unwrap() {
            CycleOutcome::UpdateFailed(UpdateError::Install(message)) => {
                assert!(message.starts_with("Checksum error"), "{message}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(machine.slot().aborted);
        assert!(!machine.slot().finalized);
        assert_no_restart(&machine);
    }

    #[test]
    fn test_required_checksum_rejects_unknown_format() {
        let config = ota_core::OtaConfig {
            require_checksum: true,
            ..test_config()
        };
        let mut machine = machine_with(
            config,
            offering(10_000, "abcd", false),
            MemorySlot::default(),
            Instant::now(),
        );

        assert!(matches!(
            machine.force_check(Instant::now()),
            Ok(CycleOutcome::UpdateFailed(UpdateError::Install(_)))
        ));
        assert!(!machine.slot().finalized);
        assert_eq!(
            machine.transport().reported_statuses(),
            [UpdateStatus::InstallFailed]
        );
    }

    #[test]
    fn test_lost_status_report_does_not_change_outcome() {
        let mut backend = offering(10_000, "abcd", false);
        backend.status_reply = 503;
        let mut machine = machine(backend, MemorySlot::default());

        assert!(matches!(
            machine.force_check(Instant::now()),
            Ok(CycleOutcome::Installed { .. })
        ));
        assert!(machine.events().contains(&OtaEvent::StatusReported {
            status: UpdateStatus::Success,
            delivered: false
        }));
        assert_eq!(machine.system().scheduled.len(), 1);
    }

    #[test]
    fn test_worker_runs_update_in_background() {
        let config = ota_core::OtaConfig {
            check_on_start: false,
            ..test_config()
        };
        let backend = offering(20_000, "abcd", false);

        let (handle, events) = OtaWorker::spawn(
            Duration::from_millis(10),
            256 * 1024,
            move |sink| {
                Ok::<_, std::convert::Infallible>(UpdateStateMachine::new(
                    config,
                    ota_core::DeviceIdentity::new(DEVICE_ID, API_KEY, CURRENT_VERSION),
                    backend,
                    MemorySlot::default(),
                    RecordingRestart::default(),
                    sink,
                    Instant::now(),
                ))
            },
        )
        .unwrap();

        handle.force_check().unwrap();

        let mut seen = Vec::new();
        loop {
            let event = events
                .recv_timeout(Duration::from_secs(10))
                .expect("worker kept emitting events");
            let done = matches!(event, OtaEvent::RestartScheduled { .. });
            seen.push(event);
            if done {
                break;
            }
        }

        assert_eq!(progress(&seen), DECILES);
        assert_eq!(
            seen.last(),
            Some(&OtaEvent::RestartScheduled {
                delay: Duration::from_secs(5)
            })
        );
        assert_eq!(handle.state(), OtaState::Success);
        assert_eq!(
            handle.force_check(),
            Err(ForceCheckError::Busy(OtaState::Success))
        );
        // Nothing else runs before the restart, not even the periodic tick
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
        handle.shutdown();
    }

    proptest! {
        #[test]
        fn prop_progress_is_every_decile_for_any_chunking(
            size in 1usize..20_000,
            chunks in prop::collection::vec(1usize..3000, 1..8),
        ) {
            let mut image = Image::pattern(size);
            image.chunks = chunks;
            let backend = ScriptedBackend::offering(manifest_json("1.1.0", size, "abcd", false), image);
            let mut machine = machine(backend, MemorySlot::default());

            let outcome = machine.force_check(Instant::now()).unwrap();
            prop_assert!(matches!(outcome, CycleOutcome::Installed { .. }), "{:?}", outcome);
            prop_assert_eq!(progress(machine.events()), DECILES.to_vec());
        }
    }
}
