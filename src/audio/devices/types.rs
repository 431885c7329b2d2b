// Core device types for output sharing
//
// Everything here is a plain value re-fetched on every enumeration. The only
// identity that survives reconnects and reboots is the device UID.

use serde::{Deserialize, Serialize};

/// Opaque platform handle (an AudioObjectID on macOS)
pub type DeviceHandle = u32;

/// An output-capable endpoint as seen by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDevice {
    pub handle: DeviceHandle,
    pub uid: String,
    pub name: String,
    /// Wireless earbud/headphone class, decided purely from the display name
    pub is_target_class: bool,
    pub is_connected: bool,
}

/// How a device is attached to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    BuiltIn,
    Usb,
    Bluetooth,
    AirPlay,
    Hdmi,
    Aggregate,
    Virtual,
    Unknown,
}

impl TransportKind {
    /// AirPlay-class devices can show up before their streams are queryable
    pub fn is_wireless_cast(&self) -> bool {
        matches!(self, TransportKind::AirPlay)
    }
}

/// Inclusive nominal sample-rate range advertised by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRateRange {
    pub min: f64,
    pub max: f64,
}

impl SampleRateRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A single discrete rate
    pub fn exact(rate: f64) -> Self {
        Self {
            min: rate,
            max: rate,
        }
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min - 0.5 && rate <= self.max + 0.5
    }
}

/// Where a volume scalar lives on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeElement {
    /// Output-scope main element
    Main,
    /// The "virtual main volume" composite some drivers expose instead
    VirtualMain,
    /// A discrete channel, 1-based
    Channel(u32),
}
