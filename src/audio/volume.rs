// Normalized per-device volume across heterogeneous hardware
//
// Devices expose volume in one of three shapes. The bridge walks an ordered
// strategy list and uses the first one the device supports:
//   1. main element volume scalar
//   2. virtual main volume
//   3. discrete channels 1 and 2, written identically

use colored::Colorize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::devices::backend::AudioBackend;
use super::devices::types::{DeviceHandle, OutputDevice, VolumeElement};
use crate::error::Result;

/// One way of reaching a device's volume
pub trait VolumeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> bool;
    fn get(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> Option<f32>;
    fn set(&self, backend: &dyn AudioBackend, device: DeviceHandle, value: f32) -> anyhow::Result<()>;
}

pub struct MainVolume;

impl VolumeStrategy for MainVolume {
    fn name(&self) -> &'static str {
        "main"
    }

    fn supports(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> bool {
        backend.has_volume(device, VolumeElement::Main)
    }

    fn get(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> Option<f32> {
        backend.volume(device, VolumeElement::Main)
    }

    fn set(&self, backend: &dyn AudioBackend, device: DeviceHandle, value: f32) -> anyhow::Result<()> {
        backend.set_volume(device, VolumeElement::Main, value)
    }
}

pub struct VirtualMainVolume;

impl VolumeStrategy for VirtualMainVolume {
    fn name(&self) -> &'static str {
        "virtual-main"
    }

    fn supports(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> bool {
        backend.has_volume(device, VolumeElement::VirtualMain)
    }

    fn get(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> Option<f32> {
        backend.volume(device, VolumeElement::VirtualMain)
    }

    fn set(&self, backend: &dyn AudioBackend, device: DeviceHandle, value: f32) -> anyhow::Result<()> {
        backend.set_volume(device, VolumeElement::VirtualMain, value)
    }
}

/// Left/right channel volumes kept in lockstep
pub struct ChannelVolume;

impl ChannelVolume {
    const CHANNELS: [u32; 2] = [1, 2];
}

impl VolumeStrategy for ChannelVolume {
    fn name(&self) -> &'static str {
        "per-channel"
    }

    fn supports(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> bool {
        Self::CHANNELS
            .iter()
            .any(|ch| backend.has_volume(device, VolumeElement::Channel(*ch)))
    }

    fn get(&self, backend: &dyn AudioBackend, device: DeviceHandle) -> Option<f32> {
        Self::CHANNELS
            .iter()
            .find_map(|ch| backend.volume(device, VolumeElement::Channel(*ch)))
    }

    fn set(&self, backend: &dyn AudioBackend, device: DeviceHandle, value: f32) -> anyhow::Result<()> {
        let mut written = 0;
        let mut last_error = None;
        for ch in Self::CHANNELS {
            let element = VolumeElement::Channel(ch);
            if !backend.has_volume(device, element) {
                continue;
            }
            match backend.set_volume(device, element, value) {
                Ok(()) => written += 1,
                Err(e) => last_error = Some(e),
            }
        }

        match (written, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Held while the bridge is writing volumes in bulk, so volume-change
/// listeners can tell our own writes from external ones. Engagements nest:
/// the guard stays engaged until every token is dropped.
#[derive(Debug, Clone, Default)]
pub struct VolumeUpdateGuard {
    holders: Arc<AtomicUsize>,
}

impl VolumeUpdateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the guard until the returned token is dropped
    pub fn engage(&self) -> VolumeUpdateToken {
        self.holders.fetch_add(1, Ordering::SeqCst);
        VolumeUpdateToken {
            holders: self.holders.clone(),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

pub struct VolumeUpdateToken {
    holders: Arc<AtomicUsize>,
}

impl Drop for VolumeUpdateToken {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Normalized 0.0–1.0 volume over any supported device shape
pub struct VolumeBridge {
    backend: Arc<dyn AudioBackend>,
    strategies: Vec<Box<dyn VolumeStrategy>>,
}

impl std::fmt::Debug for VolumeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("VolumeBridge").field("strategies", &names).finish()
    }
}

impl VolumeBridge {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_strategies(
            backend,
            vec![
                Box::new(MainVolume),
                Box::new(VirtualMainVolume),
                Box::new(ChannelVolume),
            ],
        )
    }

    pub fn with_strategies(backend: Arc<dyn AudioBackend>, strategies: Vec<Box<dyn VolumeStrategy>>) -> Self {
        Self { backend, strategies }
    }

    fn strategy_for(&self, device: DeviceHandle) -> Option<&dyn VolumeStrategy> {
        self.strategies
            .iter()
            .map(|s| s.as_ref())
            .find(|s| s.supports(self.backend.as_ref(), device))
    }

    /// `None` means unknown or unsupported
    pub fn get_volume(&self, device: &OutputDevice) -> Option<f32> {
        let strategy = self.strategy_for(device.handle)?;
        strategy
            .get(self.backend.as_ref(), device.handle)
            .map(|v| v.clamp(0.0, 1.0))
    }

    /// Clamp and write. A device with no volume control is left alone.
    pub fn set_volume(&self, device: &OutputDevice, value: f32) -> Result<()> {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

        let Some(strategy) = self.strategy_for(device.handle) else {
            debug!("No volume control on {}, ignoring set", device.name);
            return Ok(());
        };

        strategy
            .set(self.backend.as_ref(), device.handle, value)
            .map_err(|e| {
                warn!(
                    "{} Failed to set {} volume on {}: {}",
                    "VOLUME_WARN".bright_yellow(),
                    strategy.name(),
                    device.name,
                    e
                );
                e
            })?;
        Ok(())
    }

    pub fn can_control_volume(&self, device: &OutputDevice) -> bool {
        self.strategy_for(device.handle).is_some()
    }

    /// Shift a device's volume by `delta`, clamped. Returns the new value,
    /// or `None` if the device has no volume control or its current volume
    /// cannot be read.
    pub fn nudge_volume(&self, device: &OutputDevice, delta: f32) -> Option<f32> {
        // An unreadable volume is unknown, not silent
        let current = self.get_volume(device)?;
        let target = (current + delta).clamp(0.0, 1.0);
        match self.set_volume(device, target) {
            Ok(()) => Some(target),
            Err(_) => None,
        }
    }
}
