use audio_share_lib::audio::devices::{InMemoryBackend, SimulatedDevice, VolumeElement};
use audio_share_lib::audio::volume_keys::{
    KEY_MUTE, KEY_SOUND_DOWN, KEY_SOUND_UP, MEDIA_KEY_SUBTYPE,
};
use audio_share_lib::audio::{
    Collaborators, SharingController, SharingHandle, ShortcutSignal, VolumeDirection,
};
use audio_share_lib::config::SharingConfig;
use audio_share_lib::SharingError;
use std::sync::Arc;
use std::time::Duration;

/// Test volume control through the controller handle
#[cfg(test)]
mod volume_control_tests {
    use super::*;

    fn mixed_capability_outputs() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::built_in_speakers());
        backend.connect(
            SimulatedDevice::output("pods", "AirPods Pro")
                .with_volume_elements(&[(VolumeElement::VirtualMain, 0.5)]),
        );
        backend.connect(
            SimulatedDevice::output("usb", "USB Interface").with_volume_elements(&[
                (VolumeElement::Channel(1), 0.25),
                (VolumeElement::Channel(2), 0.25),
            ]),
        );
        backend.connect(SimulatedDevice::output("tv", "Living Room TV").without_volume());
        backend
    }

    async fn share_all(backend: &InMemoryBackend) -> SharingHandle {
        let (handle, _task) = SharingController::spawn(
            SharingConfig::default(),
            Arc::new(backend.clone()),
            Collaborators::default(),
        );
        let all = handle.list_output_devices().await.unwrap();
        let selection = all
            .into_iter()
            .filter(|d| ["pods", "usb", "tv"].contains(&d.uid.as_str()))
            .collect();
        handle.start_sharing(selection).await.unwrap();
        handle
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_keys_step_every_controllable_member() {
        let backend = mixed_capability_outputs();
        let handle = share_all(&backend).await;

        let adjusted = handle.volume_step(VolumeDirection::Up).await.unwrap();
        assert_eq!(adjusted, 2, "the TV has no volume control");
        assert_eq!(backend.volume_of("pods", VolumeElement::VirtualMain), Some(0.5625));
        assert_eq!(backend.volume_of("usb", VolumeElement::Channel(1)), Some(0.3125));
        assert_eq!(backend.volume_of("usb", VolumeElement::Channel(2)), Some(0.3125));

        handle
            .shortcut(ShortcutSignal::VolumeStep(VolumeDirection::Down))
            .await
            .unwrap();
        assert_eq!(backend.volume_of("pods", VolumeElement::VirtualMain), Some(0.5));

        settle().await;
        assert_eq!(handle.status().volume_changes, 0, "our own writes are not external");
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_keys_ignored_while_idle() {
        let backend = mixed_capability_outputs();
        let (handle, _task) = SharingController::spawn(
            SharingConfig::default(),
            Arc::new(backend.clone()),
            Collaborators::default(),
        );

        assert_eq!(handle.volume_step(VolumeDirection::Up).await.unwrap(), 0);
        assert_eq!(backend.volume_of("pods", VolumeElement::VirtualMain), Some(0.5));
    }

    /// `data1` payload of a system-defined media key event
    fn key_event(key_code: u16, pressed: bool) -> i64 {
        let state: i64 = if pressed { 0x0A } else { 0x0B };
        ((key_code as i64) << 16) | (state << 8)
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_keys_drive_member_volumes() {
        let backend = mixed_capability_outputs();
        let handle = share_all(&backend).await;

        let adjusted = handle
            .media_key(MEDIA_KEY_SUBTYPE, key_event(KEY_SOUND_UP, true))
            .await
            .unwrap();
        assert_eq!(adjusted, 2);
        assert_eq!(backend.volume_of("pods", VolumeElement::VirtualMain), Some(0.5625));

        // Releases, mute and foreign subtypes change nothing
        for (subtype, data1) in [
            (MEDIA_KEY_SUBTYPE, key_event(KEY_SOUND_UP, false)),
            (MEDIA_KEY_SUBTYPE, key_event(KEY_MUTE, true)),
            (1, key_event(KEY_SOUND_DOWN, true)),
        ] {
            assert_eq!(handle.media_key(subtype, data1).await.unwrap(), 0);
        }
        assert_eq!(backend.volume_of("pods", VolumeElement::VirtualMain), Some(0.5625));

        handle
            .media_key(MEDIA_KEY_SUBTYPE, key_event(KEY_SOUND_DOWN, true))
            .await
            .unwrap();
        assert_eq!(backend.volume_of("usb", VolumeElement::Channel(2)), Some(0.25));

        settle().await;
        assert_eq!(handle.status().volume_changes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_keys_ignored_without_session() {
        let backend = mixed_capability_outputs();
        let (handle, _task) = SharingController::spawn(
            SharingConfig::default(),
            Arc::new(backend.clone()),
            Collaborators::default(),
        );

        let adjusted = handle
            .media_key(MEDIA_KEY_SUBTYPE, key_event(KEY_SOUND_UP, true))
            .await
            .unwrap();
        assert_eq!(adjusted, 0);
        assert_eq!(backend.volume_of("usb", VolumeElement::Channel(1)), Some(0.25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_change_is_reported() {
        let backend = mixed_capability_outputs();
        let handle = share_all(&backend).await;

        backend.external_volume_change("pods", VolumeElement::VirtualMain, 0.2);
        settle().await;

        let status = handle.status();
        assert_eq!(status.volume_changes, 1);
        assert!(status.status_message.contains("AirPods Pro"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_set_and_capability_by_uid() {
        let backend = mixed_capability_outputs();
        let (handle, _task) = SharingController::spawn(
            SharingConfig::default(),
            Arc::new(backend.clone()),
            Collaborators::default(),
        );

        assert!(handle.can_control_volume("pods").await.unwrap());
        assert!(!handle.can_control_volume("tv").await.unwrap());
        assert!(!handle.can_control_volume("nope").await.unwrap());

        handle.set_volume("usb", 1.4).await.unwrap();
        assert_eq!(handle.get_volume("usb").await.unwrap(), Some(1.0));
        assert_eq!(handle.get_volume("tv").await.unwrap(), None);

        // No volume path: accepted and ignored
        handle.set_volume("tv", 0.3).await.unwrap();

        let result = handle.set_volume("nope", 0.3).await;
        assert!(matches!(result, Err(SharingError::DeviceNotFound { .. })));
        assert_eq!(handle.get_volume("nope").await.unwrap(), None);
    }
}
