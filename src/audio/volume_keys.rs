// Media volume keys while sharing
//
// The aggregate itself often has no usable volume knob, so volume key
// presses are spread across every member device individually. Capturing the
// keys is the shortcut source's job; this module only decodes the system
// event payload and applies the step.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::devices::types::OutputDevice;
use super::volume::{VolumeBridge, VolumeUpdateGuard};

/// `NX_SUBTYPE_AUX_CONTROL_BUTTONS`
pub const MEDIA_KEY_SUBTYPE: i16 = 8;
/// `NX_KEYTYPE_SOUND_UP`
pub const KEY_SOUND_UP: u16 = 0;
/// `NX_KEYTYPE_SOUND_DOWN`
pub const KEY_SOUND_DOWN: u16 = 1;
/// `NX_KEYTYPE_MUTE`
pub const KEY_MUTE: u16 = 7;

const KEY_STATE_DOWN: i64 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeDirection {
    Up,
    Down,
}

impl VolumeDirection {
    pub fn signed(&self, step: f32) -> f32 {
        match self {
            VolumeDirection::Up => step,
            VolumeDirection::Down => -step,
        }
    }
}

/// Decoded system-defined media key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaKeyEvent {
    pub key_code: u16,
    pub is_key_down: bool,
    pub is_repeat: bool,
}

impl MediaKeyEvent {
    /// Decode an event's subtype and `data1` field. Other subtypes yield `None`.
    pub fn decode(subtype: i16, data1: i64) -> Option<Self> {
        if subtype != MEDIA_KEY_SUBTYPE {
            return None;
        }
        let key_code = ((data1 & 0xFFFF_0000) >> 16) as u16;
        let flags = data1 & 0x0000_FFFF;
        let state = (flags & 0xFF00) >> 8;

        Some(Self {
            key_code,
            is_key_down: state == KEY_STATE_DOWN,
            is_repeat: flags & 0x1 != 0,
        })
    }

    /// Volume direction for key-down presses of the volume keys
    pub fn volume_direction(&self) -> Option<VolumeDirection> {
        if !self.is_key_down {
            return None;
        }
        match self.key_code {
            KEY_SOUND_UP => Some(VolumeDirection::Up),
            KEY_SOUND_DOWN => Some(VolumeDirection::Down),
            _ => None,
        }
    }
}

/// Applies volume steps to every member of the active aggregate
#[derive(Debug, Clone)]
pub struct VolumeKeyBridge {
    step: f32,
    guard: VolumeUpdateGuard,
}

impl VolumeKeyBridge {
    pub fn new(step: f32, guard: VolumeUpdateGuard) -> Self {
        Self { step, guard }
    }

    /// Volume direction for a raw system media-key event. Key releases,
    /// mute and other subtypes are left to the system.
    pub fn direction_for(&self, subtype: i16, data1: i64) -> Option<VolumeDirection> {
        let event = MediaKeyEvent::decode(subtype, data1)?;
        if event.key_code == KEY_MUTE {
            debug!("Mute key passed through");
            return None;
        }
        let direction = event.volume_direction()?;
        if event.is_repeat {
            debug!("Volume key {:?} held", direction);
        }
        Some(direction)
    }

    /// Nudge each controllable member independently. Returns how many devices
    /// were adjusted.
    pub fn apply(
        &self,
        volume: &VolumeBridge,
        members: &[OutputDevice],
        direction: VolumeDirection,
    ) -> usize {
        let _token = self.guard.engage();
        let delta = direction.signed(self.step);

        members
            .iter()
            .filter_map(|device| {
                let updated = volume.nudge_volume(device, delta)?;
                debug!("Volume key {:?}: {} -> {:.3}", direction, device.name, updated);
                Some(updated)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::devices::memory::{InMemoryBackend, SimulatedDevice};
    use crate::audio::devices::types::VolumeElement;
    use std::sync::Arc;

    fn data1(key_code: u16, state: i64, repeat: bool) -> i64 {
        ((key_code as i64) << 16) | (state << 8) | (repeat as i64)
    }

    #[test]
    fn test_decode_volume_up_down() {
        let event = MediaKeyEvent::decode(MEDIA_KEY_SUBTYPE, data1(KEY_SOUND_UP, 0x0A, false)).unwrap();
        assert_eq!(event.volume_direction(), Some(VolumeDirection::Up));

        let event = MediaKeyEvent::decode(MEDIA_KEY_SUBTYPE, data1(KEY_SOUND_DOWN, 0x0A, true)).unwrap();
        assert!(event.is_repeat);
        assert_eq!(event.volume_direction(), Some(VolumeDirection::Down));
    }

    #[test]
    fn test_key_up_and_other_keys_ignored() {
        let released = MediaKeyEvent::decode(MEDIA_KEY_SUBTYPE, data1(KEY_SOUND_UP, 0x0B, false)).unwrap();
        assert!(!released.is_key_down);
        assert_eq!(released.volume_direction(), None);

        let mute = MediaKeyEvent::decode(MEDIA_KEY_SUBTYPE, data1(KEY_MUTE, 0x0A, false)).unwrap();
        assert_eq!(mute.volume_direction(), None);

        assert!(MediaKeyEvent::decode(1, data1(KEY_SOUND_UP, 0x0A, false)).is_none());
    }

    #[test]
    fn test_direction_for_raw_events() {
        let bridge = VolumeKeyBridge::new(0.0625, VolumeUpdateGuard::new());

        assert_eq!(
            bridge.direction_for(MEDIA_KEY_SUBTYPE, data1(KEY_SOUND_DOWN, 0x0A, true)),
            Some(VolumeDirection::Down)
        );
        assert_eq!(bridge.direction_for(MEDIA_KEY_SUBTYPE, data1(KEY_SOUND_UP, 0x0B, false)), None);
        assert_eq!(bridge.direction_for(MEDIA_KEY_SUBTYPE, data1(KEY_MUTE, 0x0A, false)), None);
        assert_eq!(bridge.direction_for(14, data1(KEY_SOUND_UP, 0x0A, false)), None);
    }

    #[test]
    fn test_apply_steps_each_member_and_clamps() {
        let backend = InMemoryBackend::new();
        let loud = backend.connect(
            SimulatedDevice::output("a", "A").with_volume_elements(&[(VolumeElement::Main, 0.98)]),
        );
        let quiet = backend.connect(
            SimulatedDevice::output("b", "B")
                .with_volume_elements(&[(VolumeElement::VirtualMain, 0.25)]),
        );
        let fixed = backend.connect(SimulatedDevice::output("c", "C").without_volume());
        let members: Vec<OutputDevice> = [(loud, "a"), (quiet, "b"), (fixed, "c")]
            .iter()
            .map(|(handle, uid)| OutputDevice {
                handle: *handle,
                uid: uid.to_string(),
                name: uid.to_uppercase(),
                is_target_class: false,
                is_connected: true,
            })
            .collect();

        let guard = VolumeUpdateGuard::new();
        let bridge = VolumeKeyBridge::new(0.0625, guard.clone());
        let volume = VolumeBridge::new(Arc::new(backend.clone()));

        let adjusted = bridge.apply(&volume, &members, VolumeDirection::Up);

        assert_eq!(adjusted, 2);
        assert_eq!(backend.volume_of("a", VolumeElement::Main), Some(1.0));
        assert_eq!(backend.volume_of("b", VolumeElement::VirtualMain), Some(0.3125));
        assert!(!guard.is_engaged());
    }
}
