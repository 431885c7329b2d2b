// Platform seam for the OS audio subsystem
//
// Every hardware read or mutation the controller performs goes through
// `AudioBackend`. Calls are synchronous and may block; callers treat them as
// such. Listener callbacks may fire on any thread.

use std::sync::Arc;

use super::types::{DeviceHandle, SampleRateRange, TransportKind, VolumeElement};
use crate::audio::aggregate::AggregateDescription;

/// Invoked when the device list changes. Carries no payload on purpose:
/// topology payloads are unreliable, so consumers always re-enumerate.
pub type DeviceListCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked when a watched device's volume changes
pub type VolumeCallback = Arc<dyn Fn(DeviceHandle) + Send + Sync>;

/// Token returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub trait AudioBackend: Send + Sync {
    /// All device handles known to the system, outputs or not
    fn device_handles(&self) -> crate::error::Result<Vec<DeviceHandle>>;

    fn device_uid(&self, device: DeviceHandle) -> Option<String>;
    fn device_name(&self, device: DeviceHandle) -> Option<String>;

    /// Number of output streams; zero for input-only devices
    fn output_stream_count(&self, device: DeviceHandle) -> u32;
    fn transport(&self, device: DeviceHandle) -> TransportKind;
    fn is_alive(&self, device: DeviceHandle) -> bool;

    /// Resolve a UID to the handle it currently has
    fn device_for_uid(&self, uid: &str) -> Option<DeviceHandle>;

    fn available_sample_rates(&self, device: DeviceHandle) -> Vec<SampleRateRange>;
    fn set_sample_rate(&self, device: DeviceHandle, rate: f64) -> anyhow::Result<()>;

    fn default_output(&self) -> Option<DeviceHandle>;
    fn default_system_output(&self) -> Option<DeviceHandle>;
    fn set_default_output(&self, device: DeviceHandle) -> anyhow::Result<()>;
    fn set_default_system_output(&self, device: DeviceHandle) -> anyhow::Result<()>;

    fn create_aggregate(&self, description: &AggregateDescription) -> anyhow::Result<DeviceHandle>;
    fn destroy_aggregate(&self, device: DeviceHandle) -> anyhow::Result<()>;

    fn has_volume(&self, device: DeviceHandle, element: VolumeElement) -> bool;
    fn volume(&self, device: DeviceHandle, element: VolumeElement) -> Option<f32>;
    fn set_volume(
        &self,
        device: DeviceHandle,
        element: VolumeElement,
        value: f32,
    ) -> anyhow::Result<()>;

    fn add_device_list_listener(&self, callback: DeviceListCallback) -> anyhow::Result<ListenerId>;
    fn remove_device_list_listener(&self, id: ListenerId) -> anyhow::Result<()>;

    fn add_volume_listener(
        &self,
        device: DeviceHandle,
        callback: VolumeCallback,
    ) -> anyhow::Result<ListenerId>;
    fn remove_volume_listener(&self, id: ListenerId) -> anyhow::Result<()>;
}
