// Audio module - multi-device output sharing
//
// Leaf-first:
// - devices: hardware seam, device catalog and backends
// - volume / volume_keys: normalized per-device volume and media key steps
// - aggregate: multi-output description and sample-rate negotiation
// - session / sharing: the session record and the state machine driving it
// - monitor: debounced topology and volume change delivery
// - controller: the single-owner task and its handle

pub mod aggregate;
pub mod controller;
pub mod devices;
pub mod monitor;
pub mod session;
pub mod sharing;
pub mod volume;
pub mod volume_keys;

pub use aggregate::{negotiate_sample_rate, AggregateDescription, AggregateMember};
pub use controller::{SharingCommand, SharingController, SharingHandle, ShortcutSignal};
pub use devices::{AudioBackend, DeviceCatalog, InMemoryBackend, OutputDevice};
pub use monitor::{MonitorEvent, MonitorStats, TopologyMonitor};
pub use session::{AggregateSession, SessionState};
pub use sharing::{Collaborators, SharingService, SharingStatus};
pub use volume::{VolumeBridge, VolumeStrategy, VolumeUpdateGuard};
pub use volume_keys::{MediaKeyEvent, VolumeDirection, VolumeKeyBridge};
