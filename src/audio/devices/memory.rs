// In-process audio backend
//
// A scriptable model of the OS audio subsystem. Tests drive it to simulate
// hot-plug events, capability shapes and API failures; non-macOS builds can
// run the controller against it. Every mutation is recorded so callers can
// assert that an operation touched no hardware.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::backend::{AudioBackend, DeviceListCallback, ListenerId, VolumeCallback};
use super::types::{DeviceHandle, SampleRateRange, TransportKind, VolumeElement};
use crate::audio::aggregate::AggregateDescription;
use crate::error::SharingError;

/// Description of a simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub uid: String,
    pub name: String,
    pub transport: TransportKind,
    pub output_streams: u32,
    pub sample_rates: Vec<SampleRateRange>,
    pub nominal_rate: f64,
    /// Volume elements the device exposes, with their current scalar
    pub volumes: HashMap<VolumeElement, f32>,
    pub is_alive: bool,
}

impl SimulatedDevice {
    /// Stereo output with a main volume element at 48 kHz
    pub fn output(uid: &str, name: &str) -> Self {
        let mut volumes = HashMap::new();
        volumes.insert(VolumeElement::Main, 0.5);
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            transport: TransportKind::Usb,
            output_streams: 1,
            sample_rates: vec![
                SampleRateRange::exact(44100.0),
                SampleRateRange::exact(48000.0),
            ],
            nominal_rate: 48000.0,
            volumes,
            is_alive: true,
        }
    }

    /// Built-in speakers, the usual fallback output
    pub fn built_in_speakers() -> Self {
        Self::output("BuiltInSpeakerDevice", "MacBook Pro Speakers")
            .with_transport(TransportKind::BuiltIn)
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_output_streams(mut self, streams: u32) -> Self {
        self.output_streams = streams;
        self
    }

    pub fn with_sample_rates(mut self, rates: Vec<SampleRateRange>) -> Self {
        self.sample_rates = rates;
        self
    }

    /// Replace the exposed volume elements
    pub fn with_volume_elements(mut self, elements: &[(VolumeElement, f32)]) -> Self {
        self.volumes = elements.iter().copied().collect();
        self
    }

    pub fn without_volume(mut self) -> Self {
        self.volumes.clear();
        self
    }
}

/// A hardware mutation performed through the backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMutation {
    CreateAggregate { uid: String, members: Vec<String> },
    DestroyAggregate { uid: String },
    SetDefaultOutput { uid: String },
    SetDefaultSystemOutput { uid: String },
    SetSampleRate { uid: String, rate: f64 },
    SetVolume { uid: String, element: VolumeElement, value: f32 },
}

#[derive(Default)]
struct Failures {
    enumeration: Option<i32>,
    create_aggregate: bool,
    set_default_output: bool,
    set_sample_rate: bool,
}

#[derive(Default)]
struct BackendState {
    devices: HashMap<DeviceHandle, SimulatedDevice>,
    aggregates: HashMap<DeviceHandle, AggregateDescription>,
    default_output: Option<DeviceHandle>,
    default_system_output: Option<DeviceHandle>,
    next_handle: DeviceHandle,
    next_listener: u64,
    device_list_listeners: HashMap<ListenerId, DeviceListCallback>,
    volume_listeners: HashMap<ListenerId, (DeviceHandle, VolumeCallback)>,
    mutations: Vec<BackendMutation>,
    failures: Failures,
    volume_quantum: Option<f32>,
}

impl BackendState {
    fn handle_for_uid(&self, uid: &str) -> Option<DeviceHandle> {
        self.devices
            .iter()
            .find(|(_, device)| device.uid == uid)
            .map(|(handle, _)| *handle)
    }

    fn uid_of(&self, device: DeviceHandle) -> String {
        self.devices
            .get(&device)
            .map(|d| d.uid.clone())
            .unwrap_or_else(|| format!("<handle {}>", device))
    }

    fn allocate_handle(&mut self) -> DeviceHandle {
        self.next_handle += 1;
        self.next_handle
    }

    fn device_list_callbacks(&self) -> Vec<DeviceListCallback> {
        self.device_list_listeners.values().cloned().collect()
    }
}

/// Scriptable in-memory `AudioBackend`
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryBackend")
            .field("devices", &state.devices.len())
            .field("aggregates", &state.aggregates.len())
            .finish()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                next_handle: 100,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire_device_list(callbacks: Vec<DeviceListCallback>) {
        for callback in callbacks {
            callback();
        }
    }

    /// Plug a device in. A device that comes back gets a fresh handle.
    pub fn connect(&self, device: SimulatedDevice) -> DeviceHandle {
        let (handle, callbacks) = {
            let mut state = self.lock();
            if let Some(existing) = state.handle_for_uid(&device.uid) {
                state.devices.remove(&existing);
            }
            let handle = state.allocate_handle();
            debug!("Simulated connect: {} ({}) as {}", device.name, device.uid, handle);
            state.devices.insert(handle, device);
            if state.default_output.is_none() {
                state.default_output = Some(handle);
                state.default_system_output = Some(handle);
            }
            (handle, state.device_list_callbacks())
        };
        Self::fire_device_list(callbacks);
        handle
    }

    /// Unplug a device by UID; returns false if it was not present
    pub fn disconnect(&self, uid: &str) -> bool {
        let callbacks = {
            let mut state = self.lock();
            let Some(handle) = state.handle_for_uid(uid) else {
                return false;
            };
            debug!("Simulated disconnect: {} ({})", uid, handle);
            state.devices.remove(&handle);
            state.volume_listeners.retain(|_, (device, _)| *device != handle);
            if state.default_output == Some(handle) {
                state.default_output = state.devices.keys().min().copied();
            }
            if state.default_system_output == Some(handle) {
                state.default_system_output = state.devices.keys().min().copied();
            }
            state.device_list_callbacks()
        };
        Self::fire_device_list(callbacks);
        true
    }

    /// Fire device-list listeners without changing anything
    pub fn emit_device_list_changed(&self) {
        let callbacks = self.lock().device_list_callbacks();
        Self::fire_device_list(callbacks);
    }

    /// Change a device's volume as if the user used the hardware/OS slider
    pub fn external_volume_change(&self, uid: &str, element: VolumeElement, value: f32) {
        let callbacks: Vec<(DeviceHandle, VolumeCallback)> = {
            let mut state = self.lock();
            let Some(handle) = state.handle_for_uid(uid) else {
                return;
            };
            if let Some(device) = state.devices.get_mut(&handle) {
                device.volumes.insert(element, value);
            }
            state
                .volume_listeners
                .values()
                .filter(|(device, _)| *device == handle)
                .cloned()
                .collect()
        };
        for (handle, callback) in callbacks {
            callback(handle);
        }
    }

    /// Make the next enumeration fail with the given OSStatus
    pub fn fail_enumeration(&self, status: Option<i32>) {
        self.lock().failures.enumeration = status;
    }

    pub fn fail_create_aggregate(&self, fail: bool) {
        self.lock().failures.create_aggregate = fail;
    }

    pub fn fail_set_default_output(&self, fail: bool) {
        self.lock().failures.set_default_output = fail;
    }

    pub fn fail_set_sample_rate(&self, fail: bool) {
        self.lock().failures.set_sample_rate = fail;
    }

    /// Round written volumes to multiples of `quantum`, like real hardware steps
    pub fn set_volume_quantum(&self, quantum: Option<f32>) {
        self.lock().volume_quantum = quantum;
    }

    /// Leave an aggregate behind as a crashed previous run would
    pub fn plant_aggregate(&self, description: AggregateDescription) -> DeviceHandle {
        let mut state = self.lock();
        let handle = state.allocate_handle();
        state.devices.insert(
            handle,
            SimulatedDevice::output(&description.uid, &description.name)
                .with_transport(TransportKind::Aggregate),
        );
        state.aggregates.insert(handle, description);
        handle
    }

    pub fn mutations(&self) -> Vec<BackendMutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    pub fn aggregates(&self) -> Vec<AggregateDescription> {
        self.lock().aggregates.values().cloned().collect()
    }

    pub fn default_output_uid(&self) -> Option<String> {
        let state = self.lock();
        state.default_output.map(|handle| state.uid_of(handle))
    }

    pub fn default_system_output_uid(&self) -> Option<String> {
        let state = self.lock();
        state.default_system_output.map(|handle| state.uid_of(handle))
    }

    /// Point the default output somewhere directly
    pub fn set_default_output_uid(&self, uid: &str) {
        let mut state = self.lock();
        if let Some(handle) = state.handle_for_uid(uid) {
            state.default_output = Some(handle);
            state.default_system_output = Some(handle);
        }
    }

    pub fn nominal_rate(&self, uid: &str) -> Option<f64> {
        let state = self.lock();
        state
            .handle_for_uid(uid)
            .and_then(|handle| state.devices.get(&handle))
            .map(|device| device.nominal_rate)
    }

    pub fn volume_of(&self, uid: &str, element: VolumeElement) -> Option<f32> {
        let state = self.lock();
        state
            .handle_for_uid(uid)
            .and_then(|handle| state.devices.get(&handle))
            .and_then(|device| device.volumes.get(&element).copied())
    }

    pub fn device_list_listener_count(&self) -> usize {
        self.lock().device_list_listeners.len()
    }

    pub fn volume_listener_count(&self) -> usize {
        self.lock().volume_listeners.len()
    }
}

impl AudioBackend for InMemoryBackend {
    fn device_handles(&self) -> crate::error::Result<Vec<DeviceHandle>> {
        let state = self.lock();
        if let Some(status) = state.failures.enumeration {
            return Err(SharingError::PropertyQueryFailed { status });
        }
        let mut handles: Vec<DeviceHandle> = state.devices.keys().copied().collect();
        handles.sort_unstable();
        Ok(handles)
    }

    fn device_uid(&self, device: DeviceHandle) -> Option<String> {
        self.lock().devices.get(&device).map(|d| d.uid.clone())
    }

    fn device_name(&self, device: DeviceHandle) -> Option<String> {
        self.lock().devices.get(&device).map(|d| d.name.clone())
    }

    fn output_stream_count(&self, device: DeviceHandle) -> u32 {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.output_streams)
            .unwrap_or(0)
    }

    fn transport(&self, device: DeviceHandle) -> TransportKind {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.transport)
            .unwrap_or(TransportKind::Unknown)
    }

    fn is_alive(&self, device: DeviceHandle) -> bool {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.is_alive)
            .unwrap_or(false)
    }

    fn device_for_uid(&self, uid: &str) -> Option<DeviceHandle> {
        self.lock().handle_for_uid(uid)
    }

    fn available_sample_rates(&self, device: DeviceHandle) -> Vec<SampleRateRange> {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.sample_rates.clone())
            .unwrap_or_default()
    }

    fn set_sample_rate(&self, device: DeviceHandle, rate: f64) -> Result<()> {
        let mut state = self.lock();
        if state.failures.set_sample_rate {
            return Err(anyhow!("Simulated sample rate failure on {}", device));
        }
        let uid = state.uid_of(device);
        let entry = state
            .devices
            .get_mut(&device)
            .ok_or_else(|| anyhow!("No such device: {}", device))?;
        if !entry.sample_rates.iter().any(|r| r.contains(rate)) {
            return Err(anyhow!("{} does not support {} Hz", uid, rate));
        }
        entry.nominal_rate = rate;
        state.mutations.push(BackendMutation::SetSampleRate { uid, rate });
        Ok(())
    }

    fn default_output(&self) -> Option<DeviceHandle> {
        self.lock().default_output
    }

    fn default_system_output(&self) -> Option<DeviceHandle> {
        self.lock().default_system_output
    }

    fn set_default_output(&self, device: DeviceHandle) -> Result<()> {
        let mut state = self.lock();
        if state.failures.set_default_output {
            return Err(anyhow!("Simulated default output failure"));
        }
        if !state.devices.contains_key(&device) {
            return Err(anyhow!("No such device: {}", device));
        }
        state.default_output = Some(device);
        let uid = state.uid_of(device);
        state.mutations.push(BackendMutation::SetDefaultOutput { uid });
        Ok(())
    }

    fn set_default_system_output(&self, device: DeviceHandle) -> Result<()> {
        let mut state = self.lock();
        if !state.devices.contains_key(&device) {
            return Err(anyhow!("No such device: {}", device));
        }
        state.default_system_output = Some(device);
        let uid = state.uid_of(device);
        state
            .mutations
            .push(BackendMutation::SetDefaultSystemOutput { uid });
        Ok(())
    }

    fn create_aggregate(&self, description: &AggregateDescription) -> Result<DeviceHandle> {
        let (handle, callbacks) = {
            let mut state = self.lock();
            if state.failures.create_aggregate {
                return Err(anyhow!("Simulated aggregate creation failure"));
            }
            if state.handle_for_uid(&description.uid).is_some() {
                return Err(anyhow!("UID {} already in use", description.uid));
            }
            if let Some(missing) = description
                .members
                .iter()
                .find(|m| state.handle_for_uid(&m.uid).is_none())
            {
                return Err(anyhow!("Sub-device {} not present", missing.uid));
            }

            let handle = state.allocate_handle();
            let rates = description
                .clock_master_uid()
                .and_then(|uid| state.handle_for_uid(uid))
                .and_then(|h| state.devices.get(&h))
                .map(|d| d.sample_rates.clone())
                .unwrap_or_default();
            state.devices.insert(
                handle,
                SimulatedDevice::output(&description.uid, &description.name)
                    .with_transport(TransportKind::Aggregate)
                    .with_sample_rates(rates)
                    .without_volume(),
            );
            state.aggregates.insert(handle, description.clone());
            state.mutations.push(BackendMutation::CreateAggregate {
                uid: description.uid.clone(),
                members: description.member_uids(),
            });
            (handle, state.device_list_callbacks())
        };
        Self::fire_device_list(callbacks);
        Ok(handle)
    }

    fn destroy_aggregate(&self, device: DeviceHandle) -> Result<()> {
        let callbacks = {
            let mut state = self.lock();
            let description = state
                .aggregates
                .remove(&device)
                .ok_or_else(|| anyhow!("{} is not an aggregate", device))?;
            state.devices.remove(&device);
            if state.default_output == Some(device) {
                state.default_output = state.devices.keys().min().copied();
            }
            if state.default_system_output == Some(device) {
                state.default_system_output = state.devices.keys().min().copied();
            }
            state.mutations.push(BackendMutation::DestroyAggregate {
                uid: description.uid,
            });
            state.device_list_callbacks()
        };
        Self::fire_device_list(callbacks);
        Ok(())
    }

    fn has_volume(&self, device: DeviceHandle, element: VolumeElement) -> bool {
        self.lock()
            .devices
            .get(&device)
            .map(|d| d.volumes.contains_key(&element))
            .unwrap_or(false)
    }

    fn volume(&self, device: DeviceHandle, element: VolumeElement) -> Option<f32> {
        self.lock()
            .devices
            .get(&device)
            .and_then(|d| d.volumes.get(&element).copied())
    }

    fn set_volume(&self, device: DeviceHandle, element: VolumeElement, value: f32) -> Result<()> {
        let callbacks: Vec<(DeviceHandle, VolumeCallback)> = {
            let mut state = self.lock();
            let quantum = state.volume_quantum;
            let uid = state.uid_of(device);
            let entry = state
                .devices
                .get_mut(&device)
                .ok_or_else(|| anyhow!("No such device: {}", device))?;
            let slot = entry
                .volumes
                .get_mut(&element)
                .ok_or_else(|| anyhow!("{} has no {:?} volume", uid, element))?;
            *slot = match quantum {
                Some(q) if q > 0.0 => (value / q).round() * q,
                _ => value,
            };
            state
                .mutations
                .push(BackendMutation::SetVolume { uid, element, value });
            state
                .volume_listeners
                .values()
                .filter(|(watched, _)| *watched == device)
                .cloned()
                .collect()
        };
        for (handle, callback) in callbacks {
            callback(handle);
        }
        Ok(())
    }

    fn add_device_list_listener(&self, callback: DeviceListCallback) -> Result<ListenerId> {
        let mut state = self.lock();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.device_list_listeners.insert(id, callback);
        Ok(id)
    }

    fn remove_device_list_listener(&self, id: ListenerId) -> Result<()> {
        self.lock()
            .device_list_listeners
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("Unknown listener {:?}", id))
    }

    fn add_volume_listener(&self, device: DeviceHandle, callback: VolumeCallback) -> Result<ListenerId> {
        let mut state = self.lock();
        if !state.devices.contains_key(&device) {
            return Err(anyhow!("No such device: {}", device));
        }
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.volume_listeners.insert(id, (device, callback));
        Ok(id)
    }

    fn remove_volume_listener(&self, id: ListenerId) -> Result<()> {
        // Listeners on unplugged devices are dropped with the device
        self.lock().volume_listeners.remove(&id);
        Ok(())
    }
}
