// Audio devices module - hardware access and discovery
//
// - types: device value types shared by every layer
// - backend: the platform seam every hardware call goes through
// - enumeration: the device catalog (filtering and classification)
// - memory: scriptable in-process backend
// - coreaudio: Core Audio HAL backend (macOS only)

pub mod backend;
pub mod enumeration;
pub mod memory;
pub mod types;

#[cfg(target_os = "macos")]
pub mod coreaudio;

pub use backend::{AudioBackend, DeviceListCallback, ListenerId, VolumeCallback};
pub use enumeration::DeviceCatalog;
pub use memory::{BackendMutation, InMemoryBackend, SimulatedDevice};
pub use types::{DeviceHandle, OutputDevice, SampleRateRange, TransportKind, VolumeElement};

#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioBackend;
