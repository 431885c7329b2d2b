// Output device discovery
//
// Enumerates live devices from the backend, keeps the ones that can play
// audio, classifies them by display name and hides our own aggregate. Every
// call goes to the OS; nothing is cached between enumerations.

use colored::Colorize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use super::backend::AudioBackend;
use super::types::{DeviceHandle, OutputDevice, TransportKind};
use crate::error::Result;

/// Device catalog over a platform backend
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn AudioBackend>,
    reserved_uid: String,
    target_patterns: Vec<String>,
}

impl std::fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field("reserved_uid", &self.reserved_uid)
            .field("target_patterns", &self.target_patterns)
            .finish()
    }
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn AudioBackend>, reserved_uid: &str, target_patterns: &[String]) -> Self {
        Self {
            backend,
            reserved_uid: reserved_uid.to_string(),
            target_patterns: target_patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Output devices the user can pick from. Our aggregate is never listed.
    pub fn list_output_devices(&self) -> Result<Vec<OutputDevice>> {
        self.enumerate(false)
    }

    /// Same as `list_output_devices` but keeps our aggregate, so callers that
    /// reason about the whole topology can recognise it instead of guessing.
    pub fn list_output_devices_including_aggregate(&self) -> Result<Vec<OutputDevice>> {
        self.enumerate(true)
    }

    /// Current output device UIDs, or `None` when the OS query failed
    pub fn current_uids(&self) -> Option<HashSet<String>> {
        match self.list_output_devices() {
            Ok(devices) => Some(devices.into_iter().map(|d| d.uid).collect()),
            Err(e) => {
                warn!(
                    "{} Enumeration failed, skipping: {}",
                    "CATALOG_WARN".bright_yellow(),
                    e
                );
                None
            }
        }
    }

    /// Look a device up by UID in a fresh enumeration
    pub fn find_by_uid(&self, uid: &str) -> Option<OutputDevice> {
        self.list_output_devices()
            .ok()?
            .into_iter()
            .find(|device| device.uid == uid)
    }

    /// Resolve UIDs against live devices, keeping the order of `uids`
    pub fn resolve_uids(&self, uids: &[String]) -> Result<Vec<OutputDevice>> {
        let devices = self.list_output_devices()?;
        Ok(uids
            .iter()
            .filter_map(|uid| devices.iter().find(|d| &d.uid == uid).cloned())
            .collect())
    }

    /// Case-insensitive substring match against the target-class patterns
    pub fn is_target_class(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.target_patterns
            .iter()
            .any(|pattern| lowered.contains(pattern.as_str()))
    }

    pub fn is_reserved(&self, uid: &str) -> bool {
        uid == self.reserved_uid
    }

    fn enumerate(&self, include_reserved: bool) -> Result<Vec<OutputDevice>> {
        let handles = self.backend.device_handles()?;
        crate::share_debug!("Enumerating {} device handles", handles.len());

        let devices: Vec<OutputDevice> = handles
            .into_iter()
            .filter_map(|handle| self.describe(handle, include_reserved))
            .collect();

        for (i, device) in devices.iter().enumerate() {
            crate::share_debug!(
                "  {}: {} ({}) handle={} target={}",
                i,
                device.name,
                device.uid,
                device.handle,
                device.is_target_class
            );
        }

        Ok(devices)
    }

    fn describe(&self, handle: DeviceHandle, include_reserved: bool) -> Option<OutputDevice> {
        let uid = self.backend.device_uid(handle)?;
        if !include_reserved && self.is_reserved(&uid) {
            return None;
        }

        let transport = self.backend.transport(handle);
        let has_outputs = self.backend.output_stream_count(handle) > 0;
        // AirPlay devices enter the topology before their streams are published
        if !has_outputs && !transport.is_wireless_cast() {
            return None;
        }

        let name = self
            .backend
            .device_name(handle)
            .unwrap_or_else(|| uid.clone());
        let is_target_class = transport != TransportKind::Aggregate
            && !self.is_reserved(&uid)
            && self.is_target_class(&name);

        Some(OutputDevice {
            handle,
            is_connected: self.backend.is_alive(handle),
            uid,
            name,
            is_target_class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::aggregate::AggregateDescription;
    use crate::audio::devices::memory::{InMemoryBackend, SimulatedDevice};
    use crate::config::SharingConfig;

    fn catalog_for(backend: &InMemoryBackend) -> DeviceCatalog {
        let config = SharingConfig::default();
        DeviceCatalog::new(
            Arc::new(backend.clone()),
            &config.aggregate_uid,
            &config.target_name_patterns,
        )
    }

    #[test]
    fn test_built_in_speaker_only() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::built_in_speakers());

        let devices = catalog_for(&backend).list_output_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].is_target_class);
        assert!(devices[0].is_connected);
    }

    #[test]
    fn test_input_only_devices_are_skipped() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::output("mic", "USB Microphone").with_output_streams(0));
        backend.connect(SimulatedDevice::output("dac", "USB DAC"));

        let devices = catalog_for(&backend).list_output_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].uid, "dac");
    }

    #[test]
    fn test_airplay_without_streams_is_listed() {
        let backend = InMemoryBackend::new();
        backend.connect(
            SimulatedDevice::output("tv", "Living Room TV")
                .with_output_streams(0)
                .with_transport(TransportKind::AirPlay),
        );

        let devices = catalog_for(&backend).list_output_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].uid, "tv");
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        let backend = InMemoryBackend::new();
        let catalog = catalog_for(&backend);

        assert!(catalog.is_target_class("Alice's AirPods Pro"));
        assert!(catalog.is_target_class("AIRPODS"));
        assert!(catalog.is_target_class("Powerbeats Pro"));
        assert!(!catalog.is_target_class("MacBook Pro Speakers"));
    }

    #[test]
    fn test_reserved_aggregate_hidden_unless_requested() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::output("a", "AirPods"));
        let config = SharingConfig::default();
        backend.plant_aggregate(AggregateDescription::multi_output(
            &config.aggregate_uid,
            "AirPods Shared",
            &["a".to_string()],
        ));
        let catalog = catalog_for(&backend);

        let visible = catalog.list_output_devices().unwrap();
        assert!(visible.iter().all(|d| d.uid != config.aggregate_uid));

        let all = catalog.list_output_devices_including_aggregate().unwrap();
        let aggregate = all.iter().find(|d| d.uid == config.aggregate_uid).unwrap();
        assert!(!aggregate.is_target_class, "our aggregate never counts as an earbud");
    }

    #[test]
    fn test_enumeration_failure_is_typed() {
        let backend = InMemoryBackend::new();
        backend.fail_enumeration(Some(-50));

        let result = catalog_for(&backend).list_output_devices();
        assert!(matches!(
            result,
            Err(crate::error::SharingError::PropertyQueryFailed { status: -50 })
        ));
        assert!(catalog_for(&backend).current_uids().is_none());
    }

    #[test]
    fn test_resolve_uids_keeps_requested_order() {
        let backend = InMemoryBackend::new();
        backend.connect(SimulatedDevice::output("a", "A"));
        backend.connect(SimulatedDevice::output("b", "B"));

        let resolved = catalog_for(&backend)
            .resolve_uids(&["b".to_string(), "gone".to_string(), "a".to_string()])
            .unwrap();
        let uids: Vec<_> = resolved.iter().map(|d| d.uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "a"]);
    }
}
