use audio_share_lib::audio::devices::{
    BackendMutation, InMemoryBackend, SampleRateRange, SimulatedDevice, TransportKind,
};
use audio_share_lib::audio::{Collaborators, MonitorEvent, OutputDevice, SessionState, SharingService};
use audio_share_lib::config::{SharingConfig, RESERVED_AGGREGATE_UID};
use audio_share_lib::db::MemoryPreferencesStore;
use audio_share_lib::notifications::{ChannelNotifier, Notifier, SharingEvent};
use audio_share_lib::permissions::{AccessGate, AlwaysAllowed};
use audio_share_lib::SharingError;
use mockall::mock;
use std::sync::Arc;
use tokio::sync::mpsc;

mock! {
    pub Gate {}
    impl AccessGate for Gate {
        fn is_access_allowed(&self) -> bool;
    }
}

mock! {
    pub Notify {}
    impl Notifier for Notify {
        fn notify(&self, event: SharingEvent);
    }
}

/// Test the start/stop state machine directly, without the controller task
#[cfg(test)]
mod session_lifecycle_tests {
    use super::*;

    struct Harness {
        backend: InMemoryBackend,
        service: SharingService,
        _events: mpsc::UnboundedReceiver<MonitorEvent>,
    }

    fn speakers_and_two_outputs() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::built_in_speakers());
        backend.connect(SimulatedDevice::output("a", "Alice's AirPods"));
        backend.connect(SimulatedDevice::output("b", "Bob's AirPods"));
        backend
    }

    fn create_test_service(backend: &InMemoryBackend, collaborators: Collaborators) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = SharingService::new(
            SharingConfig::default(),
            Arc::new(backend.clone()),
            collaborators,
            tx,
        );
        Harness {
            backend: backend.clone(),
            service,
            _events: rx,
        }
    }

    fn pick(service: &SharingService, uids: &[&str]) -> Vec<OutputDevice> {
        let devices = service.list_output_devices().unwrap();
        uids.iter()
            .map(|uid| devices.iter().find(|d| d.uid == *uid).unwrap().clone())
            .collect()
    }

    #[tokio::test]
    async fn test_start_then_stop_restores_default_output() {
        let (notifier, mut notifications) = ChannelNotifier::new();
        let mut h = create_test_service(
            &speakers_and_two_outputs(),
            Collaborators {
                notifier: Arc::new(notifier),
                ..Default::default()
            },
        );
        let before = h.backend.default_output_uid();
        assert_eq!(before.as_deref(), Some("BuiltInSpeakerDevice"));

        let devices = pick(&h.service, &["a", "b"]);
        let session = h.service.start_sharing(&devices, true).await.unwrap();

        assert!(session.is_active);
        assert_eq!(session.member_uids, vec!["a", "b"]);
        assert_eq!(session.pre_session_default_output, before);
        assert_eq!(h.backend.default_output_uid().as_deref(), Some(RESERVED_AGGREGATE_UID));
        assert_eq!(h.backend.default_system_output_uid().as_deref(), Some(RESERVED_AGGREGATE_UID));

        let aggregates = h.backend.aggregates();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].clock_master_uid(), Some("a"));
        assert!(!aggregates[0].members[0].drift_compensation);
        assert!(aggregates[0].members[1].drift_compensation);

        assert!(h.service.stop_sharing(None, false));

        assert_eq!(h.backend.default_output_uid(), before);
        assert_eq!(h.backend.default_system_output_uid(), before);
        assert!(h.backend.aggregates().is_empty());
        assert_eq!(h.service.session().state(), SessionState::Idle);

        assert_eq!(
            notifications.try_recv().unwrap(),
            SharingEvent::SharingStarted { device_count: 2 }
        );
        assert_eq!(notifications.try_recv().unwrap(), SharingEvent::SharingStopped);
        assert!(notifications.try_recv().is_err(), "exactly one notification per stop");
    }

    #[tokio::test]
    async fn test_status_serializes_with_session_id() {
        let mut h = create_test_service(&speakers_and_two_outputs(), Collaborators::default());
        let devices = pick(&h.service, &["a", "b"]);
        let session = h.service.start_sharing(&devices, true).await.unwrap();

        let status = h.service.subscribe().borrow().clone();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["is_sharing_active"], true);
        assert_eq!(
            json["session_id"].as_str(),
            session.session_id.map(|id| id.to_string()).as_deref()
        );
        assert!(json["started_at"].is_string());
    }

    #[tokio::test]
    async fn test_fewer_than_two_devices_touches_no_hardware() {
        let mut h = create_test_service(&speakers_and_two_outputs(), Collaborators::default());
        h.backend.clear_mutations();

        let one = pick(&h.service, &["a"]);
        let result = h.service.start_sharing(&one, true).await;
        assert!(matches!(result, Err(SharingError::InvalidDevice { count: 1 })));

        let result = h.service.start_sharing(&[], true).await;
        assert!(matches!(result, Err(SharingError::InvalidDevice { count: 0 })));

        // The same device twice is still one device
        let twice = pick(&h.service, &["a", "a"]);
        let result = h.service.start_sharing(&twice, true).await;
        assert!(matches!(result, Err(SharingError::InvalidDevice { count: 1 })));

        assert!(h.backend.mutations().is_empty());
        assert!(!h.service.is_sharing_active());
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected_before_mutation() {
        let mut h = create_test_service(&speakers_and_two_outputs(), Collaborators::default());
        h.backend.clear_mutations();

        let mut devices = pick(&h.service, &["a"]);
        devices.push(OutputDevice {
            handle: 4242,
            uid: "ghost".to_string(),
            name: "Ghost".to_string(),
            is_target_class: false,
            is_connected: false,
        });

        let result = h.service.start_sharing(&devices, true).await;
        assert!(matches!(result, Err(SharingError::DeviceNotFound { uid }) if uid == "ghost"));
        assert!(h.backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_access_denied_before_any_mutation() {
        let mut gate = MockGate::new();
        gate.expect_is_access_allowed().times(1).return_const(false);

        let mut h = create_test_service(
            &speakers_and_two_outputs(),
            Collaborators {
                access_gate: Arc::new(gate),
                ..Default::default()
            },
        );
        h.backend.clear_mutations();

        let devices = pick(&h.service, &["a", "b"]);
        let result = h.service.start_sharing(&devices, true).await;

        assert!(matches!(result, Err(SharingError::AccessDenied)));
        assert!(h.backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_silent_noop() {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().times(0);

        let mut h = create_test_service(
            &speakers_and_two_outputs(),
            Collaborators {
                notifier: Arc::new(notifier),
                ..Default::default()
            },
        );
        h.backend.clear_mutations();

        assert!(!h.service.stop_sharing(None, false));
        assert!(!h.service.stop_sharing(Some("Alice's AirPods"), true));
        assert!(h.backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_rolls_back_completely() {
        let mut h = create_test_service(&speakers_and_two_outputs(), Collaborators::default());
        h.backend.fail_create_aggregate(true);

        let devices = pick(&h.service, &["a", "b"]);
        let result = h.service.start_sharing(&devices, true).await;

        assert!(matches!(result, Err(SharingError::AggregateCreationFailed { .. })));
        assert!(h.backend.aggregates().is_empty());
        assert_eq!(h.backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert!(!h.service.is_sharing_active());
        assert!(h.service.session().aggregate_handle.is_none());
    }

    #[tokio::test]
    async fn test_default_output_failure_destroys_new_aggregate() {
        let mut h = create_test_service(&speakers_and_two_outputs(), Collaborators::default());
        h.backend.fail_set_default_output(true);

        let devices = pick(&h.service, &["a", "b"]);
        let result = h.service.start_sharing(&devices, true).await;

        assert!(matches!(result, Err(SharingError::Backend(_))));
        assert!(h.backend.aggregates().is_empty(), "no half-created aggregate left behind");
        assert_eq!(h.backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert!(!h.service.is_sharing_active());
    }

    #[tokio::test]
    async fn test_common_sample_rate_applied_best_effort() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::built_in_speakers());
        backend.connect(SimulatedDevice::output("a", "A"));
        backend.connect(
            SimulatedDevice::output("b", "B").with_sample_rates(vec![SampleRateRange::exact(44100.0)]),
        );
        let mut h = create_test_service(&backend, Collaborators::default());

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();

        assert_eq!(backend.nominal_rate("a"), Some(44100.0));
        assert_eq!(backend.nominal_rate("b"), Some(44100.0));
        assert_eq!(backend.nominal_rate(RESERVED_AGGREGATE_UID), Some(44100.0));
    }

    #[tokio::test]
    async fn test_sample_rate_failures_do_not_block_sharing() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::built_in_speakers());
        backend.connect(
            SimulatedDevice::output("a", "A").with_sample_rates(vec![SampleRateRange::exact(96000.0)]),
        );
        backend.connect(SimulatedDevice::output("b", "B"));
        backend.connect(SimulatedDevice::output("c", "C"));
        let mut h = create_test_service(&backend, Collaborators::default());

        // No rate in common: nothing is forced
        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        assert!(!backend
            .mutations()
            .iter()
            .any(|m| matches!(m, BackendMutation::SetSampleRate { .. })));
        h.service.stop_sharing(None, false);

        // A rate in common that the hardware refuses
        backend.fail_set_sample_rate(true);
        let devices = pick(&h.service, &["b", "c"]);
        assert!(h.service.start_sharing(&devices, true).await.is_ok());
        assert!(h.service.is_sharing_active());
    }

    #[tokio::test]
    async fn test_restart_keeps_original_snapshot() {
        let backend = speakers_and_two_outputs();
        backend.connect(SimulatedDevice::output("c", "Carol's Beats"));
        let mut h = create_test_service(&backend, Collaborators::default());

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        let devices = pick(&h.service, &["c", "a", "b"]);
        let session = h.service.start_sharing(&devices, true).await.unwrap();

        assert_eq!(session.pre_session_default_output.as_deref(), Some("BuiltInSpeakerDevice"));
        assert_eq!(backend.aggregates().len(), 1);
        assert_eq!(backend.aggregates()[0].clock_master_uid(), Some("c"));

        h.service.stop_sharing(None, false);
        assert_eq!(backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert!(backend.aggregates().is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_moves_output_off_before_destroy_and_reports_stop() {
        let backend = speakers_and_two_outputs();
        backend.connect(SimulatedDevice::output("c", "Carol's Beats"));
        let (notifier, mut notifications) = ChannelNotifier::new();
        let mut h = create_test_service(
            &backend,
            Collaborators {
                notifier: Arc::new(notifier),
                ..Default::default()
            },
        );

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        let _ = notifications.try_recv();
        backend.clear_mutations();
        backend.fail_create_aggregate(true);

        let devices = pick(&h.service, &["c", "a", "b"]);
        let result = h.service.start_sharing(&devices, true).await;
        assert!(matches!(result, Err(SharingError::AggregateCreationFailed { .. })));

        let mutations = backend.mutations();
        let restored_at = mutations
            .iter()
            .position(|m| matches!(m, BackendMutation::SetDefaultOutput { .. }))
            .unwrap();
        let destroyed_at = mutations
            .iter()
            .position(|m| matches!(m, BackendMutation::DestroyAggregate { .. }))
            .unwrap();
        assert!(restored_at < destroyed_at, "output must leave the aggregate first: {:?}", mutations);
        assert_eq!(
            mutations[restored_at],
            BackendMutation::SetDefaultOutput {
                uid: "BuiltInSpeakerDevice".to_string()
            }
        );

        assert!(!h.service.is_sharing_active());
        assert_eq!(h.service.session().state(), SessionState::Idle);
        assert!(backend.aggregates().is_empty());
        assert_eq!(backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert_eq!(notifications.try_recv().unwrap(), SharingEvent::SharingStopped);
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_built_in_speakers() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::output("dac", "USB DAC"));
        backend.connect(SimulatedDevice::output("studio", "Studio Speakers"));
        backend.connect(SimulatedDevice::built_in_speakers());
        backend.connect(SimulatedDevice::output("a", "A"));
        backend.connect(SimulatedDevice::output("b", "B"));
        let mut h = create_test_service(&backend, Collaborators::default());
        assert_eq!(backend.default_output_uid().as_deref(), Some("dac"));

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        backend.disconnect("dac");
        h.service.stop_sharing(None, false);

        assert_eq!(backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
    }

    #[tokio::test]
    async fn test_restore_prefers_speaker_name_without_built_in() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::output("dac", "USB DAC"));
        backend.connect(SimulatedDevice::output("hdmi", "LG Display").with_transport(TransportKind::Hdmi));
        backend.connect(SimulatedDevice::output("desk", "Desk Speakers"));
        backend.connect(SimulatedDevice::output("a", "A"));
        backend.connect(SimulatedDevice::output("b", "B"));
        let mut h = create_test_service(&backend, Collaborators::default());

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        backend.disconnect("dac");
        h.service.stop_sharing(None, false);

        assert_eq!(backend.default_output_uid().as_deref(), Some("desk"));
    }

    #[tokio::test]
    async fn test_stale_aggregate_removed_and_output_recovered() {
        let backend = speakers_and_two_outputs();
        let config = SharingConfig::default();
        backend.plant_aggregate(audio_share_lib::audio::AggregateDescription::multi_output(
            &config.aggregate_uid,
            &config.aggregate_name,
            &["a".to_string(), "b".to_string()],
        ));
        backend.set_default_output_uid(&config.aggregate_uid);
        let mut h = create_test_service(&backend, Collaborators::default());

        assert!(h.service.cleanup_stale_aggregate());
        assert!(backend.aggregates().is_empty());
        assert_eq!(backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert!(!h.service.cleanup_stale_aggregate());
    }

    #[tokio::test]
    async fn test_start_replaces_leftover_aggregate() {
        let backend = speakers_and_two_outputs();
        let config = SharingConfig::default();
        backend.plant_aggregate(audio_share_lib::audio::AggregateDescription::multi_output(
            &config.aggregate_uid,
            "Leftover",
            &["a".to_string()],
        ));
        let mut h = create_test_service(&backend, Collaborators::default());

        let devices = pick(&h.service, &["b", "a"]);
        h.service.start_sharing(&devices, true).await.unwrap();

        let aggregates = backend.aggregates();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].member_uids(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_missing_member_pauses_manual_session() {
        let (notifier, mut notifications) = ChannelNotifier::new();
        let backend = speakers_and_two_outputs();
        let mut h = create_test_service(
            &backend,
            Collaborators {
                notifier: Arc::new(notifier),
                access_gate: Arc::new(AlwaysAllowed),
                preferences: Arc::new(MemoryPreferencesStore::default()),
            },
        );

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, true).await.unwrap();
        let _ = notifications.try_recv();

        backend.disconnect("b");
        h.service.reconcile();

        let session = h.service.session();
        assert_eq!(session.state(), SessionState::Interrupted);
        assert!(session.is_interrupted);
        assert_eq!(session.paused_member_uids, vec!["a", "b"]);
        assert_eq!(backend.default_output_uid().as_deref(), Some("BuiltInSpeakerDevice"));
        assert_eq!(
            notifications.try_recv().unwrap(),
            SharingEvent::DeviceDisconnected {
                name: "Bob's AirPods".to_string()
            }
        );
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_member_of_auto_session_does_not_pause() {
        let backend = speakers_and_two_outputs();
        let mut h = create_test_service(&backend, Collaborators::default());

        let devices = pick(&h.service, &["a", "b"]);
        h.service.start_sharing(&devices, false).await.unwrap();
        backend.disconnect("a");
        h.service.reconcile();

        let session = h.service.session();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_interrupted);
        assert!(session.paused_member_uids.is_empty());
    }
}
