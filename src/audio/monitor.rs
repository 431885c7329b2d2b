// Hardware topology and volume change monitoring
//
// Owns the single "device list changed" subscription and the per-member
// volume listeners. OS callbacks may arrive on any thread; they only push a
// payload-free signal into a channel. A debounce task restarts its timer on
// every signal and hands the owner one `Reconcile` once the list has been
// quiet for the whole window.

use colored::Colorize;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::devices::backend::{AudioBackend, ListenerId};
use super::devices::types::DeviceHandle;
use super::volume::VolumeUpdateGuard;

/// Work the monitor hands to the session owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The device list settled after one or more changes
    Reconcile,
    /// A watched device's volume changed outside our own bulk writes
    VolumeChanged(DeviceHandle),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub signals_received: u64,
    pub reconciliations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    signals_received: AtomicU64,
    reconciliations: AtomicU64,
}

pub struct TopologyMonitor {
    backend: Arc<dyn AudioBackend>,
    guard: VolumeUpdateGuard,
    signals: mpsc::UnboundedSender<()>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    device_list_listener: Option<ListenerId>,
    volume_listeners: Vec<ListenerId>,
    counters: Arc<Counters>,
    debounce_task: JoinHandle<()>,
}

impl std::fmt::Debug for TopologyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyMonitor")
            .field("subscribed", &self.device_list_listener.is_some())
            .field("volume_listeners", &self.volume_listeners.len())
            .finish()
    }
}

impl TopologyMonitor {
    /// Must be called from inside a tokio runtime; the debounce task starts
    /// immediately and lives as long as the monitor.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        debounce: Duration,
        guard: VolumeUpdateGuard,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let debounce_task = tokio::spawn(debounce_loop(
            signal_rx,
            events.clone(),
            debounce,
            counters.clone(),
        ));

        Self {
            backend,
            guard,
            signals,
            events,
            device_list_listener: None,
            volume_listeners: Vec::new(),
            counters,
            debounce_task,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.device_list_listener.is_some()
    }

    /// Register the device-list listener. Already subscribed is a no-op.
    pub fn subscribe(&mut self) -> anyhow::Result<()> {
        if self.device_list_listener.is_some() {
            return Ok(());
        }

        let signals = self.signals.clone();
        let counters = self.counters.clone();
        let id = self.backend.add_device_list_listener(Arc::new(move || {
            counters.signals_received.fetch_add(1, Ordering::Relaxed);
            // Closed only when the monitor is gone
            let _ = signals.send(());
        }))?;

        self.device_list_listener = Some(id);
        info!("{} Watching device list", "MONITOR_START".bright_green());
        Ok(())
    }

    /// Remove the device-list listener. Not subscribed is a no-op.
    pub fn unsubscribe(&mut self) {
        let Some(id) = self.device_list_listener.take() else {
            return;
        };
        if let Err(e) = self.backend.remove_device_list_listener(id) {
            warn!(
                "{} Failed to remove device list listener: {}",
                "MONITOR_WARN".bright_yellow(),
                e
            );
        }
        info!("{} Stopped watching device list", "MONITOR_STOP".bright_red());
    }

    /// Replace the watched volume set with `devices`
    pub fn watch_volumes(&mut self, devices: &[DeviceHandle]) {
        self.unwatch_volumes();

        for &device in devices {
            let events = self.events.clone();
            let guard = self.guard.clone();
            let callback = Arc::new(move |handle: DeviceHandle| {
                if guard.is_engaged() {
                    return;
                }
                let _ = events.send(MonitorEvent::VolumeChanged(handle));
            });

            match self.backend.add_volume_listener(device, callback) {
                Ok(id) => self.volume_listeners.push(id),
                Err(e) => debug!("No volume listener on {}: {}", device, e),
            }
        }
    }

    pub fn unwatch_volumes(&mut self) {
        for id in self.volume_listeners.drain(..) {
            if let Err(e) = self.backend.remove_volume_listener(id) {
                debug!("Failed to remove volume listener {:?}: {}", id, e);
            }
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            signals_received: self.counters.signals_received.load(Ordering::Relaxed),
            reconciliations: self.counters.reconciliations.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TopologyMonitor {
    fn drop(&mut self) {
        self.unwatch_volumes();
        self.unsubscribe();
        self.debounce_task.abort();
    }
}

async fn debounce_loop(
    mut signals: mpsc::UnboundedReceiver<()>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    window: Duration,
    counters: Arc<Counters>,
) {
    while signals.recv().await.is_some() {
        // Every signal inside the window pushes the deadline out again
        loop {
            tokio::select! {
                next = signals.recv() => {
                    if next.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(window) => break,
            }
        }

        counters.reconciliations.fetch_add(1, Ordering::Relaxed);
        crate::share_debug!("Device list settled, reconciling");
        if events.send(MonitorEvent::Reconcile).is_err() {
            return;
        }
    }
}
