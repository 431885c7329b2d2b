// Core Audio HAL backend (macOS)
//
// Direct AudioObject property access through coreaudio-sys. Aggregate
// devices are described with a CFDictionary built via core-foundation.
// Listener closures are boxed and kept in a registry; the box address is the
// client-data pointer handed to the HAL, so removal uses the same pointer.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use core_foundation::array::CFArray;
use core_foundation::base::{CFType, TCFType};
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use coreaudio_sys::{
    kAudioDevicePropertyAvailableNominalSampleRates, kAudioDevicePropertyDeviceIsAlive,
    kAudioDevicePropertyDeviceUID, kAudioDevicePropertyNominalSampleRate,
    kAudioDevicePropertyStreams, kAudioDevicePropertyTransportType,
    kAudioDevicePropertyVolumeScalar, kAudioDeviceTransportTypeAggregate,
    kAudioDeviceTransportTypeAirPlay, kAudioDeviceTransportTypeBluetooth,
    kAudioDeviceTransportTypeBluetoothLE, kAudioDeviceTransportTypeBuiltIn,
    kAudioDeviceTransportTypeHDMI, kAudioDeviceTransportTypeUSB,
    kAudioDeviceTransportTypeVirtual, kAudioHardwarePropertyDefaultOutputDevice,
    kAudioHardwarePropertyDefaultSystemOutputDevice, kAudioHardwarePropertyDevices,
    kAudioHardwarePropertyTranslateUIDToDevice, kAudioObjectPropertyElementMaster,
    kAudioObjectPropertyName, kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeOutput,
    kAudioObjectSystemObject, AudioHardwareCreateAggregateDevice,
    AudioHardwareDestroyAggregateDevice, AudioObjectAddPropertyListener, AudioObjectGetPropertyData,
    AudioObjectGetPropertyDataSize, AudioObjectHasProperty, AudioObjectID,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
    AudioValueRange, OSStatus,
};

use super::backend::{AudioBackend, DeviceListCallback, ListenerId, VolumeCallback};
use super::types::{DeviceHandle, SampleRateRange, TransportKind, VolumeElement};
use crate::audio::aggregate::AggregateDescription;
use crate::error::SharingError;

/// 'vmvc', kAudioHardwareServiceDeviceProperty_VirtualMainVolume
const VIRTUAL_MAIN_VOLUME: u32 = 1986885219;

const AGGREGATE_UID_KEY: &str = "uid";
const AGGREGATE_NAME_KEY: &str = "name";
const AGGREGATE_SUB_DEVICE_LIST_KEY: &str = "subdevices";
const AGGREGATE_MAIN_SUB_DEVICE_KEY: &str = "master";
const AGGREGATE_CLOCK_DEVICE_KEY: &str = "clock";
const AGGREGATE_IS_PRIVATE_KEY: &str = "private";
const AGGREGATE_IS_STACKED_KEY: &str = "stacked";
const SUB_DEVICE_UID_KEY: &str = "uid";
const SUB_DEVICE_DRIFT_COMPENSATION_KEY: &str = "drift";

fn address(selector: u32, scope: u32, element: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: element,
    }
}

fn global(selector: u32) -> AudioObjectPropertyAddress {
    address(
        selector,
        kAudioObjectPropertyScopeGlobal,
        kAudioObjectPropertyElementMaster,
    )
}

fn volume_address(element: VolumeElement) -> AudioObjectPropertyAddress {
    match element {
        VolumeElement::Main => address(
            kAudioDevicePropertyVolumeScalar,
            kAudioObjectPropertyScopeOutput,
            kAudioObjectPropertyElementMaster,
        ),
        VolumeElement::VirtualMain => address(
            VIRTUAL_MAIN_VOLUME,
            kAudioObjectPropertyScopeOutput,
            kAudioObjectPropertyElementMaster,
        ),
        VolumeElement::Channel(channel) => address(
            kAudioDevicePropertyVolumeScalar,
            kAudioObjectPropertyScopeOutput,
            channel,
        ),
    }
}

fn check(status: OSStatus, what: &str) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(anyhow!("{} failed: OSStatus {}", what, status))
    }
}

/// Read a fixed-size POD property
unsafe fn get_value<T: Default>(object: AudioObjectID, addr: &AudioObjectPropertyAddress) -> Option<T> {
    let mut value = T::default();
    let mut size = mem::size_of::<T>() as u32;
    let status = AudioObjectGetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        &mut size,
        &mut value as *mut T as *mut c_void,
    );
    (status == 0).then_some(value)
}

unsafe fn set_value<T>(object: AudioObjectID, addr: &AudioObjectPropertyAddress, value: &T) -> OSStatus {
    AudioObjectSetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        mem::size_of::<T>() as u32,
        value as *const T as *const c_void,
    )
}

/// Read a variable-length array property
unsafe fn get_array<T: Copy>(
    object: AudioObjectID,
    addr: &AudioObjectPropertyAddress,
) -> std::result::Result<Vec<T>, OSStatus> {
    let mut size: u32 = 0;
    let status = AudioObjectGetPropertyDataSize(object, addr, 0, ptr::null(), &mut size);
    if status != 0 {
        return Err(status);
    }

    let count = size as usize / mem::size_of::<T>();
    let mut values: Vec<T> = vec![mem::zeroed(); count];
    if count == 0 {
        return Ok(values);
    }

    let status = AudioObjectGetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        &mut size,
        values.as_mut_ptr() as *mut c_void,
    );
    if status != 0 {
        return Err(status);
    }
    values.truncate(size as usize / mem::size_of::<T>());
    Ok(values)
}

/// Read a CFString property, taking ownership of the returned reference
unsafe fn get_string(object: AudioObjectID, addr: &AudioObjectPropertyAddress) -> Option<String> {
    let mut string_ref: coreaudio_sys::CFStringRef = ptr::null();
    let mut size = mem::size_of::<coreaudio_sys::CFStringRef>() as u32;
    let status = AudioObjectGetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        &mut size,
        &mut string_ref as *mut _ as *mut c_void,
    );
    if status != 0 || string_ref.is_null() {
        return None;
    }
    let string =
        CFString::wrap_under_create_rule(string_ref as core_foundation::string::CFStringRef);
    Some(string.to_string())
}

enum ListenerKind {
    DeviceList(DeviceListCallback),
    Volume(VolumeCallback),
}

struct ListenerContext {
    device: DeviceHandle,
    kind: ListenerKind,
}

struct Registration {
    object: AudioObjectID,
    address: AudioObjectPropertyAddress,
    context: Box<ListenerContext>,
}

unsafe extern "C" fn property_listener(
    _object: AudioObjectID,
    _address_count: u32,
    _addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() {
        return 0;
    }
    let context = &*(client_data as *const ListenerContext);
    match &context.kind {
        ListenerKind::DeviceList(callback) => callback(),
        ListenerKind::Volume(callback) => callback(context.device),
    }
    0
}

/// `AudioBackend` over the Core Audio HAL
pub struct CoreAudioBackend {
    registrations: Mutex<HashMap<u64, Registration>>,
    next_listener: Mutex<u64>,
}

impl std::fmt::Debug for CoreAudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreAudioBackend")
            .field("listeners", &self.lock().len())
            .finish()
    }
}

impl Default for CoreAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreAudioBackend {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            next_listener: Mutex::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(
        &self,
        object: AudioObjectID,
        addr: AudioObjectPropertyAddress,
        context: ListenerContext,
    ) -> Result<ListenerId> {
        let context = Box::new(context);
        let client_data = &*context as *const ListenerContext as *mut c_void;

        let status = unsafe {
            AudioObjectAddPropertyListener(object, &addr, Some(property_listener), client_data)
        };
        check(status, "AudioObjectAddPropertyListener")?;

        let id = {
            let mut next = self
                .next_listener
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *next += 1;
            *next
        };
        self.lock().insert(
            id,
            Registration {
                object,
                address: addr,
                context,
            },
        );
        Ok(ListenerId(id))
    }

    fn unregister(&self, id: ListenerId) -> Result<()> {
        let registration = self
            .lock()
            .remove(&id.0)
            .ok_or_else(|| anyhow!("Unknown listener {:?}", id))?;
        let client_data = &*registration.context as *const ListenerContext as *mut c_void;

        let status = unsafe {
            AudioObjectRemovePropertyListener(
                registration.object,
                &registration.address,
                Some(property_listener),
                client_data,
            )
        };
        check(status, "AudioObjectRemovePropertyListener")
    }

    fn aggregate_dictionary(description: &AggregateDescription) -> Result<CFDictionary<CFType, CFType>> {
        let clock_uid = description
            .clock_master_uid()
            .context("Aggregate needs at least one member")?;

        let sub_devices: Vec<CFType> = description
            .members
            .iter()
            .map(|member| {
                let drift = CFNumber::from(i32::from(member.drift_compensation));
                CFDictionary::from_CFType_pairs(&[
                    (
                        CFString::new(SUB_DEVICE_UID_KEY).as_CFType(),
                        CFString::new(&member.uid).as_CFType(),
                    ),
                    (
                        CFString::new(SUB_DEVICE_DRIFT_COMPENSATION_KEY).as_CFType(),
                        drift.as_CFType(),
                    ),
                ])
                .as_CFType()
            })
            .collect();
        let sub_device_list = CFArray::from_CFTypes(&sub_devices);

        Ok(CFDictionary::from_CFType_pairs(&[
            (
                CFString::new(AGGREGATE_UID_KEY).as_CFType(),
                CFString::new(&description.uid).as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_NAME_KEY).as_CFType(),
                CFString::new(&description.name).as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_SUB_DEVICE_LIST_KEY).as_CFType(),
                sub_device_list.as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_MAIN_SUB_DEVICE_KEY).as_CFType(),
                CFString::new(clock_uid).as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_CLOCK_DEVICE_KEY).as_CFType(),
                CFString::new(clock_uid).as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_IS_PRIVATE_KEY).as_CFType(),
                CFNumber::from(i32::from(description.is_private)).as_CFType(),
            ),
            (
                CFString::new(AGGREGATE_IS_STACKED_KEY).as_CFType(),
                CFNumber::from(i32::from(description.is_stacked)).as_CFType(),
            ),
        ]))
    }
}

impl Drop for CoreAudioBackend {
    fn drop(&mut self) {
        let ids: Vec<u64> = self.lock().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.unregister(ListenerId(id)) {
                debug!("Listener cleanup: {}", e);
            }
        }
    }
}

impl AudioBackend for CoreAudioBackend {
    fn device_handles(&self) -> crate::error::Result<Vec<DeviceHandle>> {
        unsafe {
            get_array::<AudioObjectID>(kAudioObjectSystemObject, &global(kAudioHardwarePropertyDevices))
                .map_err(|status| SharingError::PropertyQueryFailed { status })
        }
    }

    fn device_uid(&self, device: DeviceHandle) -> Option<String> {
        unsafe { get_string(device, &global(kAudioDevicePropertyDeviceUID)) }
    }

    fn device_name(&self, device: DeviceHandle) -> Option<String> {
        unsafe { get_string(device, &global(kAudioObjectPropertyName)) }
    }

    fn output_stream_count(&self, device: DeviceHandle) -> u32 {
        let addr = address(
            kAudioDevicePropertyStreams,
            kAudioObjectPropertyScopeOutput,
            kAudioObjectPropertyElementMaster,
        );
        let mut size: u32 = 0;
        let status =
            unsafe { AudioObjectGetPropertyDataSize(device, &addr, 0, ptr::null(), &mut size) };
        if status != 0 {
            return 0;
        }
        size / mem::size_of::<AudioObjectID>() as u32
    }

    fn transport(&self, device: DeviceHandle) -> TransportKind {
        let Some(kind) =
            (unsafe { get_value::<u32>(device, &global(kAudioDevicePropertyTransportType)) })
        else {
            return TransportKind::Unknown;
        };

        match kind {
            kAudioDeviceTransportTypeBuiltIn => TransportKind::BuiltIn,
            kAudioDeviceTransportTypeUSB => TransportKind::Usb,
            kAudioDeviceTransportTypeBluetooth | kAudioDeviceTransportTypeBluetoothLE => {
                TransportKind::Bluetooth
            }
            kAudioDeviceTransportTypeAirPlay => TransportKind::AirPlay,
            kAudioDeviceTransportTypeHDMI => TransportKind::Hdmi,
            kAudioDeviceTransportTypeAggregate => TransportKind::Aggregate,
            kAudioDeviceTransportTypeVirtual => TransportKind::Virtual,
            _ => TransportKind::Unknown,
        }
    }

    fn is_alive(&self, device: DeviceHandle) -> bool {
        unsafe { get_value::<u32>(device, &global(kAudioDevicePropertyDeviceIsAlive)) }
            .map(|alive| alive != 0)
            .unwrap_or(false)
    }

    fn device_for_uid(&self, uid: &str) -> Option<DeviceHandle> {
        let cf_uid = CFString::new(uid);
        let uid_ref = cf_uid.as_concrete_TypeRef();
        let mut device: AudioObjectID = 0;
        let mut size = mem::size_of::<AudioObjectID>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &global(kAudioHardwarePropertyTranslateUIDToDevice),
                mem::size_of_val(&uid_ref) as u32,
                &uid_ref as *const _ as *const c_void,
                &mut size,
                &mut device as *mut AudioObjectID as *mut c_void,
            )
        };

        // kAudioObjectUnknown (0) means no such device
        (status == 0 && device != 0).then_some(device)
    }

    fn available_sample_rates(&self, device: DeviceHandle) -> Vec<SampleRateRange> {
        unsafe {
            get_array::<AudioValueRange>(
                device,
                &global(kAudioDevicePropertyAvailableNominalSampleRates),
            )
        }
        .map(|ranges| {
            ranges
                .iter()
                .map(|r| SampleRateRange::new(r.mMinimum, r.mMaximum))
                .collect()
        })
        .unwrap_or_default()
    }

    fn set_sample_rate(&self, device: DeviceHandle, rate: f64) -> Result<()> {
        let status =
            unsafe { set_value(device, &global(kAudioDevicePropertyNominalSampleRate), &rate) };
        check(status, "Set nominal sample rate")
    }

    fn default_output(&self) -> Option<DeviceHandle> {
        unsafe {
            get_value::<AudioObjectID>(
                kAudioObjectSystemObject,
                &global(kAudioHardwarePropertyDefaultOutputDevice),
            )
        }
        .filter(|id| *id != 0)
    }

    fn default_system_output(&self) -> Option<DeviceHandle> {
        unsafe {
            get_value::<AudioObjectID>(
                kAudioObjectSystemObject,
                &global(kAudioHardwarePropertyDefaultSystemOutputDevice),
            )
        }
        .filter(|id| *id != 0)
    }

    fn set_default_output(&self, device: DeviceHandle) -> Result<()> {
        let status = unsafe {
            set_value(
                kAudioObjectSystemObject,
                &global(kAudioHardwarePropertyDefaultOutputDevice),
                &device,
            )
        };
        check(status, "Set default output device")
    }

    fn set_default_system_output(&self, device: DeviceHandle) -> Result<()> {
        let status = unsafe {
            set_value(
                kAudioObjectSystemObject,
                &global(kAudioHardwarePropertyDefaultSystemOutputDevice),
                &device,
            )
        };
        check(status, "Set default system output device")
    }

    fn create_aggregate(&self, description: &AggregateDescription) -> Result<DeviceHandle> {
        let dict = Self::aggregate_dictionary(description)?;
        let mut device: AudioObjectID = 0;

        let status = unsafe {
            AudioHardwareCreateAggregateDevice(
                dict.as_concrete_TypeRef() as coreaudio_sys::CFDictionaryRef,
                &mut device,
            )
        };
        check(status, "AudioHardwareCreateAggregateDevice")?;

        info!(
            "{} HAL aggregate '{}' ready as {} ({} sub-devices)",
            "AGGREGATE_CREATED".bright_green(),
            description.uid,
            device,
            description.members.len()
        );
        Ok(device)
    }

    fn destroy_aggregate(&self, device: DeviceHandle) -> Result<()> {
        let status = unsafe { AudioHardwareDestroyAggregateDevice(device) };
        check(status, "AudioHardwareDestroyAggregateDevice")
    }

    fn has_volume(&self, device: DeviceHandle, element: VolumeElement) -> bool {
        let addr = volume_address(element);
        unsafe { AudioObjectHasProperty(device, &addr) != 0 }
    }

    fn volume(&self, device: DeviceHandle, element: VolumeElement) -> Option<f32> {
        unsafe { get_value::<f32>(device, &volume_address(element)) }
    }

    fn set_volume(&self, device: DeviceHandle, element: VolumeElement, value: f32) -> Result<()> {
        let status = unsafe { set_value(device, &volume_address(element), &value) };
        check(status, "Set volume scalar")
    }

    fn add_device_list_listener(&self, callback: DeviceListCallback) -> Result<ListenerId> {
        self.register(
            kAudioObjectSystemObject,
            global(kAudioHardwarePropertyDevices),
            ListenerContext {
                device: kAudioObjectSystemObject,
                kind: ListenerKind::DeviceList(callback),
            },
        )
    }

    fn remove_device_list_listener(&self, id: ListenerId) -> Result<()> {
        self.unregister(id)
    }

    fn add_volume_listener(&self, device: DeviceHandle, callback: VolumeCallback) -> Result<ListenerId> {
        let element = [
            VolumeElement::Main,
            VolumeElement::VirtualMain,
            VolumeElement::Channel(1),
        ]
        .into_iter()
        .find(|element| self.has_volume(device, *element))
        .ok_or_else(|| anyhow!("Device {} exposes no volume property", device))?;

        self.register(
            device,
            volume_address(element),
            ListenerContext {
                device,
                kind: ListenerKind::Volume(callback),
            },
        )
    }

    fn remove_volume_listener(&self, id: ListenerId) -> Result<()> {
        // The HAL drops listeners of vanished devices itself
        if let Err(e) = self.unregister(id) {
            warn!(
                "{} Volume listener removal: {}",
                "COREAUDIO_WARN".bright_yellow(),
                e
            );
        }
        Ok(())
    }
}
