// Aggregate session manager
//
// Builds the multi-output aggregate from a device selection, redirects the
// system outputs to it, and tears everything back down. Also owns topology
// reconciliation: pausing on a missing member, silent resume when the whole
// paused set returns, and auto-share for newly connected earbuds.
//
// Only the controller task touches a `SharingService`, so no method here
// ever runs concurrently with another.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregate::{negotiate_sample_rate, AggregateDescription};
use super::devices::backend::AudioBackend;
use super::devices::enumeration::DeviceCatalog;
use super::devices::types::{DeviceHandle, OutputDevice, TransportKind};
use super::monitor::{MonitorEvent, TopologyMonitor};
use super::session::{AggregateSession, SessionState};
use super::volume::{VolumeBridge, VolumeUpdateGuard};
use super::volume_keys::{VolumeDirection, VolumeKeyBridge};
use crate::config::SharingConfig;
use crate::db::{MemoryPreferencesStore, PreferencesStore};
use crate::error::{Result, SharingError};
use crate::notifications::{Notifier, SharingEvent, TracingNotifier};
use crate::permissions::{AccessGate, AlwaysAllowed};

/// External collaborators injected into the controller
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub access_gate: Arc<dyn AccessGate>,
    pub preferences: Arc<dyn PreferencesStore>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            notifier: Arc::new(TracingNotifier),
            access_gate: Arc::new(AlwaysAllowed),
            preferences: Arc::new(MemoryPreferencesStore::default()),
        }
    }
}

/// Observable state for UI layers
#[derive(Debug, Clone, Serialize)]
pub struct SharingStatus {
    pub is_sharing_active: bool,
    pub is_interrupted: bool,
    pub state: SessionState,
    /// Human readable, not a contract
    pub status_message: String,
    pub member_names: Vec<String>,
    pub auto_share_enabled: bool,
    pub volume_changes: u64,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for SharingStatus {
    fn default() -> Self {
        Self {
            is_sharing_active: false,
            is_interrupted: false,
            state: SessionState::Idle,
            status_message: "Ready".to_string(),
            member_names: Vec::new(),
            auto_share_enabled: false,
            volume_changes: 0,
            session_id: None,
            started_at: None,
        }
    }
}

pub struct SharingService {
    config: SharingConfig,
    backend: Arc<dyn AudioBackend>,
    catalog: DeviceCatalog,
    volume: VolumeBridge,
    volume_keys: VolumeKeyBridge,
    guard: VolumeUpdateGuard,
    monitor: TopologyMonitor,
    session: AggregateSession,
    /// Target-class UIDs seen at the last auto-share check
    previously_connected: HashSet<String>,
    auto_share_enabled: bool,
    status_message: String,
    volume_changes: u64,
    collaborators: Collaborators,
    status: watch::Sender<SharingStatus>,
}

impl std::fmt::Debug for SharingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharingService")
            .field("session", &self.session)
            .field("auto_share_enabled", &self.auto_share_enabled)
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl SharingService {
    /// Must be created inside a tokio runtime (the topology monitor spawns
    /// its debounce task immediately).
    pub fn new(
        config: SharingConfig,
        backend: Arc<dyn AudioBackend>,
        collaborators: Collaborators,
        monitor_events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Self {
        let catalog = DeviceCatalog::new(
            backend.clone(),
            &config.aggregate_uid,
            &config.target_name_patterns,
        );
        let guard = VolumeUpdateGuard::new();
        let monitor = TopologyMonitor::new(
            backend.clone(),
            config.debounce,
            guard.clone(),
            monitor_events,
        );
        let auto_share_enabled = config.auto_share_enabled;
        let (status, _) = watch::channel(SharingStatus {
            auto_share_enabled,
            ..Default::default()
        });

        Self {
            catalog,
            volume: VolumeBridge::new(backend.clone()),
            volume_keys: VolumeKeyBridge::new(config.volume_step, guard.clone()),
            guard,
            monitor,
            session: AggregateSession::default(),
            previously_connected: HashSet::new(),
            auto_share_enabled,
            status_message: "Ready".to_string(),
            volume_changes: 0,
            collaborators,
            status,
            backend,
            config,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SharingStatus> {
        self.status.subscribe()
    }

    pub fn session(&self) -> &AggregateSession {
        &self.session
    }

    pub fn is_sharing_active(&self) -> bool {
        self.session.is_active
    }

    /// One-time work when the controller comes up: clear leftovers from a
    /// crashed run, seed the auto-share baseline and optionally restore the
    /// last selection.
    pub async fn startup(&mut self) {
        info!("{} Sharing controller starting", "SHARE_INIT".bright_blue());

        self.cleanup_stale_aggregate();
        self.previously_connected = self.connected_target_uids();

        if self.auto_share_enabled {
            self.ensure_monitoring();
        }

        let auto_restore = match self.collaborators.preferences.auto_restore_on_launch().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("{} {}", "PREFS_WARN".bright_yellow(), e);
                false
            }
        };

        if auto_restore {
            match self.start_last_selected().await {
                Ok(()) => info!(
                    "{} Restored sharing from last session",
                    "SHARE_RESTORE".bright_green()
                ),
                Err(e) => info!(
                    "{} Auto-restore skipped: {}",
                    "SHARE_RESTORE".bright_yellow(),
                    e
                ),
            }
        }

        self.publish();
    }

    pub fn list_output_devices(&self) -> Result<Vec<OutputDevice>> {
        self.catalog.list_output_devices()
    }

    /// Start (or restart) sharing across `devices`. Member order is kept:
    /// the first device becomes the clock master.
    pub async fn start_sharing(
        &mut self,
        devices: &[OutputDevice],
        is_manual: bool,
    ) -> Result<AggregateSession> {
        let members = self.start_session(devices, is_manual)?;

        self.collaborators.notifier.notify(SharingEvent::SharingStarted {
            device_count: members.len(),
        });

        if is_manual {
            let uids: Vec<String> = members.iter().map(|d| d.uid.clone()).collect();
            if let Err(e) = self
                .collaborators
                .preferences
                .set_last_selected_device_uids(&uids)
                .await
            {
                warn!("{} Could not store selection: {}", "PREFS_WARN".bright_yellow(), e);
            }
        }

        self.publish();
        Ok(self.session.clone())
    }

    /// Stop sharing and put the previous outputs back. Returns whether a
    /// live session was actually torn down.
    pub fn stop_sharing(&mut self, trigger_device_name: Option<&str>, allow_resume: bool) -> bool {
        if !self.session.is_active {
            debug!("Stop requested while idle, nothing to do");
            return false;
        }

        info!(
            "{} Stopping sharing (trigger: {}, resume: {})",
            "SHARE_STOP".bright_red(),
            trigger_device_name.unwrap_or("user"),
            allow_resume
        );

        if allow_resume && self.session.was_started_manually {
            self.session.pause_members();
        } else {
            self.session.clear_paused();
            self.session.is_interrupted = false;
        }

        self.monitor.unwatch_volumes();
        if !(self.auto_share_enabled || self.session.has_paused()) {
            self.monitor.unsubscribe();
        }

        // Restore first, destroy second: a crash in between still leaves a
        // usable default output
        let previous_output = self.session.pre_session_default_output.clone();
        let previous_system_output = self.session.pre_session_default_system_output.clone();
        self.restore_default_outputs(previous_output.as_deref(), previous_system_output.as_deref());

        if let Some(handle) = self.session.aggregate_handle {
            self.destroy_aggregate(handle);
        }

        self.session.reset_active();

        if !self.session.has_paused() {
            self.previously_connected = self.connected_target_uids();
        }

        let event = match trigger_device_name {
            Some(name) => SharingEvent::DeviceDisconnected {
                name: name.to_string(),
            },
            None => SharingEvent::SharingStopped,
        };
        self.status_message = match &event {
            SharingEvent::DeviceDisconnected { name } if self.session.has_paused() => {
                format!("{} disconnected, waiting for it to return", name)
            }
            SharingEvent::DeviceDisconnected { name } => format!("{} disconnected", name),
            _ => "Sharing stopped".to_string(),
        };
        self.collaborators.notifier.notify(event);

        self.publish();
        true
    }

    /// Look at the settled device list and react to what changed
    pub fn reconcile(&mut self) {
        if !self.session.is_active {
            if self.session.has_paused() {
                self.try_resume();
            } else if self.auto_share_enabled {
                self.check_auto_share();
            }
            return;
        }

        let Some(current) = self.catalog.current_uids() else {
            return;
        };

        let missing: Vec<String> = self
            .session
            .member_uids
            .iter()
            .filter(|uid| !current.contains(*uid))
            .cloned()
            .collect();

        if let Some(first) = missing.first() {
            let name = self
                .session
                .member_name(first)
                .unwrap_or(first.as_str())
                .to_string();
            warn!(
                "{} {} member(s) gone, first: {}",
                "SHARE_MEMBER_LOST".bright_yellow(),
                missing.len(),
                name
            );
            self.session.is_interrupted = true;
            self.stop_sharing(Some(&name), true);
        }
    }

    pub fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Reconcile => self.reconcile(),
            MonitorEvent::VolumeChanged(handle) => self.on_external_volume_change(handle),
        }
    }

    /// Destroy any aggregate carrying our reserved UID that is not the live
    /// session's. Returns whether something was removed.
    pub fn cleanup_stale_aggregate(&mut self) -> bool {
        let Some(handle) = self.backend.device_for_uid(&self.config.aggregate_uid) else {
            return false;
        };
        if self.session.aggregate_handle == Some(handle) {
            return false;
        }

        warn!(
            "{} Found leftover aggregate '{}' ({}), removing",
            "AGGREGATE_STALE".bright_yellow(),
            self.config.aggregate_uid,
            handle
        );

        if self.backend.default_output() == Some(handle)
            || self.backend.default_system_output() == Some(handle)
        {
            self.restore_default_outputs(None, None);
        }
        self.destroy_aggregate(handle);
        true
    }

    pub fn set_auto_share(&mut self, enabled: bool) {
        if self.auto_share_enabled == enabled {
            return;
        }
        self.auto_share_enabled = enabled;
        info!(
            "{} Auto-share {}",
            "SHARE_AUTO".bright_cyan(),
            if enabled { "enabled" } else { "disabled" }
        );

        if enabled {
            self.previously_connected = self.connected_target_uids();
            self.ensure_monitoring();
        } else if !self.session.is_active && !self.session.has_paused() {
            self.monitor.unsubscribe();
        }
        self.publish();
    }

    /// Stop when active, otherwise start with the last selection. Returns
    /// whether sharing is active afterwards.
    pub async fn toggle(&mut self) -> Result<bool> {
        if self.session.is_active {
            self.stop_sharing(None, false);
            return Ok(false);
        }
        self.start_last_selected().await?;
        Ok(true)
    }

    /// Start sharing with a saved favorite, skipping members that are not
    /// connected right now
    pub async fn apply_favorite(&mut self, name: &str) -> Result<AggregateSession> {
        let favorites = self.collaborators.preferences.favorites().await?;
        let uids = favorites.get(name).ok_or_else(|| SharingError::DeviceNotFound {
            uid: name.to_string(),
        })?;

        let resolved = self.catalog.resolve_uids(uids)?;
        if resolved.len() < 2 {
            let missing = uids
                .iter()
                .find(|uid| !resolved.iter().any(|d| &d.uid == *uid))
                .cloned()
                .unwrap_or_else(|| name.to_string());
            return Err(SharingError::DeviceNotFound { uid: missing });
        }

        info!(
            "{} Applying favorite '{}' ({}/{} devices present)",
            "SHARE_FAVORITE".bright_cyan(),
            name,
            resolved.len(),
            uids.len()
        );
        self.start_sharing(&resolved, true).await
    }

    /// Nudge every live member by one volume step. Returns how many devices
    /// changed.
    pub fn volume_step(&mut self, direction: VolumeDirection) -> usize {
        if !self.session.is_active {
            return 0;
        }
        let members = self.live_members();
        let adjusted = self.volume_keys.apply(&self.volume, &members, direction);
        if adjusted > 0 {
            self.status_message = format!("Volume {:?} on {} devices", direction, adjusted);
            self.publish();
        }
        adjusted
    }

    /// Handle a raw media-key event. Only volume key presses during a live
    /// session do anything; returns how many devices changed.
    pub fn media_key(&mut self, subtype: i16, data1: i64) -> usize {
        if !self.session.is_active {
            return 0;
        }
        match self.volume_keys.direction_for(subtype, data1) {
            Some(direction) => self.volume_step(direction),
            None => 0,
        }
    }

    pub fn get_volume(&self, uid: &str) -> Option<f32> {
        let device = self.catalog.find_by_uid(uid)?;
        self.volume.get_volume(&device)
    }

    pub fn set_volume(&self, uid: &str, value: f32) -> Result<()> {
        let device = self
            .catalog
            .find_by_uid(uid)
            .ok_or_else(|| SharingError::DeviceNotFound {
                uid: uid.to_string(),
            })?;
        let _token = self.guard.engage();
        self.volume.set_volume(&device, value)
    }

    pub fn can_control_volume(&self, uid: &str) -> bool {
        self.catalog
            .find_by_uid(uid)
            .map(|device| self.volume.can_control_volume(&device))
            .unwrap_or(false)
    }

    /// Tear everything down for process exit
    pub fn shutdown(&mut self) {
        self.stop_sharing(None, false);
        self.session.clear_paused();
        self.session.is_interrupted = false;
        self.monitor.unwatch_volumes();
        self.monitor.unsubscribe();
        self.status_message = "Shut down".to_string();
        self.publish();
        let stats = self.monitor.stats();
        info!(
            "{} Sharing controller stopped ({} device list signals, {} reconciliations)",
            "SHARE_SHUTDOWN".bright_red(),
            stats.signals_received,
            stats.reconciliations
        );
    }

    fn start_session(&mut self, devices: &[OutputDevice], is_manual: bool) -> Result<Vec<OutputDevice>> {
        if !self.collaborators.access_gate.is_access_allowed() {
            warn!("{} Sharing not allowed right now", "SHARE_DENIED".bright_red());
            return Err(SharingError::AccessDenied);
        }

        let mut seen = HashSet::new();
        let requested: Vec<&OutputDevice> = devices
            .iter()
            .filter(|d| seen.insert(d.uid.clone()))
            .collect();
        if requested.len() < 2 {
            return Err(SharingError::InvalidDevice {
                count: requested.len(),
            });
        }

        // Handles go stale across reconnects; only the UID is trusted
        let mut members = Vec::with_capacity(requested.len());
        for device in requested {
            let handle = self
                .backend
                .device_for_uid(&device.uid)
                .ok_or_else(|| SharingError::DeviceNotFound {
                    uid: device.uid.clone(),
                })?;
            members.push(OutputDevice {
                handle,
                ..device.clone()
            });
        }

        // 1. Snapshot the outputs we will redirect. A restart keeps the
        // snapshot of the session it replaces.
        let (previous_output, previous_system_output) = if self.session.is_active {
            (
                self.session.pre_session_default_output.clone(),
                self.session.pre_session_default_system_output.clone(),
            )
        } else {
            (
                self.default_uid(self.backend.default_output()),
                self.default_uid(self.backend.default_system_output()),
            )
        };

        // 2. Member identity, clock master first
        let member_uids: Vec<String> = members.iter().map(|d| d.uid.clone()).collect();
        info!(
            "{} Sharing across {} devices, clock master '{}'",
            "SHARE_START".bright_green(),
            members.len(),
            members[0].name
        );

        // 3. Common nominal rate
        let ranges: Vec<_> = members
            .iter()
            .map(|d| self.backend.available_sample_rates(d.handle))
            .collect();
        let rate = negotiate_sample_rate(&self.config.preferred_sample_rates, &ranges);
        match rate {
            Some(rate) => debug!("Negotiated {} Hz for all members", rate),
            None => info!(
                "{} No common sample rate, leaving device rates alone",
                "SHARE_RATE".bright_yellow()
            ),
        }

        // 4. Whatever holds our reserved identity goes first. Outputs leave
        // it before it is destroyed, same order as a stop.
        if self.session.is_active {
            self.monitor.unwatch_volumes();
        }
        if let Some(stale) = self.backend.device_for_uid(&self.config.aggregate_uid) {
            let is_default = self.backend.default_output() == Some(stale)
                || self.backend.default_system_output() == Some(stale);
            if self.session.is_active || is_default {
                self.restore_default_outputs(previous_output.as_deref(), previous_system_output.as_deref());
            }
            self.destroy_aggregate(stale);
        }

        // 5. Build the aggregate
        let description = AggregateDescription::multi_output(
            &self.config.aggregate_uid,
            &self.config.aggregate_name,
            &member_uids,
        );
        let aggregate = match self.backend.create_aggregate(&description) {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "{} Failed to create aggregate: {}",
                    "AGGREGATE_ERROR".bright_red(),
                    e
                );
                self.abandon_start(previous_output.as_deref(), previous_system_output.as_deref());
                return Err(SharingError::AggregateCreationFailed {
                    reason: e.to_string(),
                });
            }
        };
        info!(
            "{} Created aggregate '{}' ({})",
            "AGGREGATE_CREATE".bright_cyan(),
            description.uid,
            aggregate
        );

        // 6. Best effort rate alignment
        if let Some(rate) = rate {
            for handle in members.iter().map(|d| d.handle).chain(std::iter::once(aggregate)) {
                if let Err(e) = self.backend.set_sample_rate(handle, rate) {
                    warn!(
                        "{} Could not set {} Hz on {}: {}",
                        "SHARE_RATE".bright_yellow(),
                        rate,
                        handle,
                        e
                    );
                }
            }
        }

        // 7. Redirect output. Only the general default is load-bearing.
        if let Err(e) = self.backend.set_default_output(aggregate) {
            error!(
                "{} Could not make the aggregate the default output: {}",
                "SHARE_ERROR".bright_red(),
                e
            );
            self.destroy_aggregate(aggregate);
            self.abandon_start(previous_output.as_deref(), previous_system_output.as_deref());
            return Err(SharingError::Backend(e));
        }
        if let Err(e) = self.backend.set_default_system_output(aggregate) {
            warn!(
                "{} Alert sounds stay on the previous device: {}",
                "SHARE_WARN".bright_yellow(),
                e
            );
        }

        // 8. Watch topology and member volumes
        self.ensure_monitoring();
        let handles: Vec<DeviceHandle> = members.iter().map(|d| d.handle).collect();
        self.monitor.watch_volumes(&handles);

        // 9. Live
        self.session.activate(&members, aggregate, is_manual);
        self.session.pre_session_default_output = previous_output;
        self.session.pre_session_default_system_output = previous_system_output;
        self.session.clear_paused();
        self.status_message = format!("Sharing to {}", self.session.display_names().join(", "));

        Ok(members)
    }

    /// Undo a start that failed before output was redirected. A failed
    /// restart has already torn the previous session down, so it is
    /// reported as a stop.
    fn abandon_start(&mut self, previous_output: Option<&str>, previous_system_output: Option<&str>) {
        let was_active = self.session.is_active;
        self.restore_default_outputs(previous_output, previous_system_output);
        self.session.reset_active();
        if !(self.auto_share_enabled || self.session.has_paused()) {
            self.monitor.unsubscribe();
        }
        if was_active {
            warn!(
                "{} Restart failed, previous session is gone",
                "SHARE_STOP".bright_red()
            );
            if !self.session.has_paused() {
                self.previously_connected = self.connected_target_uids();
            }
            self.status_message = "Sharing stopped".to_string();
            self.collaborators.notifier.notify(SharingEvent::SharingStopped);
        }
        self.publish();
    }

    fn try_resume(&mut self) {
        let devices = match self.catalog.list_output_devices() {
            Ok(devices) => devices,
            Err(_) => return,
        };

        let paused = self.session.paused_member_uids.clone();
        let present: Vec<OutputDevice> = paused
            .iter()
            .filter_map(|uid| devices.iter().find(|d| &d.uid == uid).cloned())
            .collect();

        if present.len() != paused.len() {
            debug!(
                "Resume pending: {}/{} paused devices present",
                present.len(),
                paused.len()
            );
            return;
        }

        info!(
            "{} All paused devices are back, resuming",
            "SHARE_RESUME".bright_green()
        );
        match self.start_session(&present, true) {
            Ok(_) => {
                self.status_message =
                    format!("Resumed sharing to {}", self.session.display_names().join(", "));
                self.publish();
            }
            Err(e) => {
                warn!("{} Resume failed: {}", "SHARE_RESUME".bright_yellow(), e);
            }
        }
    }

    fn check_auto_share(&mut self) {
        let devices = match self.catalog.list_output_devices_including_aggregate() {
            Ok(devices) => devices,
            Err(_) => return,
        };

        let targets: Vec<OutputDevice> = devices
            .into_iter()
            .filter(|d| d.is_target_class && d.is_connected)
            .collect();
        let current: HashSet<String> = targets.iter().map(|d| d.uid.clone()).collect();
        let newly_seen: Vec<&OutputDevice> = targets
            .iter()
            .filter(|d| !self.previously_connected.contains(&d.uid))
            .collect();
        let first_new = newly_seen.first().map(|d| d.name.clone());
        self.previously_connected = current;

        let Some(name) = first_new else {
            return;
        };
        if targets.len() < 2 {
            debug!("New target device {} but only {} connected", name, targets.len());
            return;
        }

        info!(
            "{} {} connected, auto-sharing across {} devices",
            "SHARE_AUTO".bright_cyan(),
            name,
            targets.len()
        );
        self.collaborators
            .notifier
            .notify(SharingEvent::NewDeviceConnected { name });

        match self.start_session(&targets, false) {
            Ok(members) => {
                self.collaborators.notifier.notify(SharingEvent::SharingStarted {
                    device_count: members.len(),
                });
                self.publish();
            }
            Err(e) => warn!("{} Auto-share failed: {}", "SHARE_AUTO".bright_yellow(), e),
        }
    }

    async fn start_last_selected(&mut self) -> Result<()> {
        let uids = self
            .collaborators
            .preferences
            .last_selected_device_uids()
            .await?;
        let resolved = self.catalog.resolve_uids(&uids)?;
        if resolved.len() < 2 {
            return Err(SharingError::InvalidDevice {
                count: resolved.len(),
            });
        }
        self.start_sharing(&resolved, true).await?;
        Ok(())
    }

    fn on_external_volume_change(&mut self, handle: DeviceHandle) {
        if self.guard.is_engaged() || !self.session.is_active {
            return;
        }
        self.volume_changes += 1;
        let name = self
            .backend
            .device_uid(handle)
            .and_then(|uid| self.session.member_name(&uid).map(str::to_string))
            .unwrap_or_else(|| handle.to_string());
        crate::share_debug!("External volume change on {}", name);
        self.status_message = format!("Volume changed on {}", name);
        self.publish();
    }

    /// Members of the live session as currently enumerated
    fn live_members(&self) -> Vec<OutputDevice> {
        let devices = self.catalog.list_output_devices().unwrap_or_default();
        self.session
            .member_uids
            .iter()
            .filter_map(|uid| devices.iter().find(|d| &d.uid == uid).cloned())
            .collect()
    }

    fn connected_target_uids(&self) -> HashSet<String> {
        self.catalog
            .list_output_devices()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.is_target_class && d.is_connected)
            .map(|d| d.uid)
            .collect()
    }

    fn ensure_monitoring(&mut self) {
        if let Err(e) = self.monitor.subscribe() {
            warn!(
                "{} Could not watch the device list: {}",
                "MONITOR_WARN".bright_yellow(),
                e
            );
        }
    }

    /// UID of a default device, ignoring our own aggregate
    fn default_uid(&self, handle: Option<DeviceHandle>) -> Option<String> {
        let uid = self.backend.device_uid(handle?)?;
        (!self.catalog.is_reserved(&uid)).then_some(uid)
    }

    fn restore_default_outputs(&self, output_uid: Option<&str>, system_output_uid: Option<&str>) {
        let output = output_uid
            .and_then(|uid| self.backend.device_for_uid(uid))
            .or_else(|| self.fallback_output());
        let Some(output) = output else {
            warn!(
                "{} No output device left to restore",
                "SHARE_RESTORE_WARN".bright_yellow()
            );
            return;
        };

        match self.backend.set_default_output(output) {
            Ok(()) => info!(
                "{} Default output restored to {}",
                "SHARE_RESTORE".bright_magenta(),
                self.backend.device_name(output).unwrap_or_default()
            ),
            Err(e) => warn!(
                "{} Failed to restore default output: {}",
                "SHARE_RESTORE_WARN".bright_yellow(),
                e
            ),
        }

        let system_output = system_output_uid
            .and_then(|uid| self.backend.device_for_uid(uid))
            .unwrap_or(output);
        if let Err(e) = self.backend.set_default_system_output(system_output) {
            warn!(
                "{} Failed to restore system output: {}",
                "SHARE_RESTORE_WARN".bright_yellow(),
                e
            );
        }
    }

    /// Built-in speakers if we can find them, otherwise anything that plays
    fn fallback_output(&self) -> Option<DeviceHandle> {
        let devices = self.catalog.list_output_devices().ok()?;
        let is_speaker = |d: &OutputDevice| d.name.to_lowercase().contains("speaker");
        let is_built_in = |d: &OutputDevice| self.backend.transport(d.handle) == TransportKind::BuiltIn;

        devices
            .iter()
            .find(|d| is_built_in(d) && is_speaker(d))
            .or_else(|| devices.iter().find(|d| is_built_in(d)))
            .or_else(|| devices.iter().find(|d| is_speaker(d)))
            .or_else(|| devices.first())
            .map(|d| d.handle)
    }

    fn destroy_aggregate(&self, handle: DeviceHandle) {
        match self.backend.destroy_aggregate(handle) {
            Ok(()) => info!(
                "{} Destroyed aggregate {}",
                "AGGREGATE_DESTROY".bright_cyan(),
                handle
            ),
            Err(e) => warn!(
                "{} Failed to destroy aggregate {}: {}",
                "AGGREGATE_WARN".bright_yellow(),
                handle,
                e
            ),
        }
    }

    fn publish(&self) {
        let status = SharingStatus {
            is_sharing_active: self.session.is_active,
            is_interrupted: self.session.is_interrupted,
            state: self.session.state(),
            status_message: self.status_message.clone(),
            member_names: self.session.display_names(),
            auto_share_enabled: self.auto_share_enabled,
            volume_changes: self.volume_changes,
            session_id: self.session.session_id,
            started_at: self.session.started_at,
        };
        self.status.send_replace(status);
    }
}
