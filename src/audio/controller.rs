// Single owner for all sharing state
//
// One tokio task owns the `SharingService`. Everything else talks to it
// through a `SharingHandle`: commands go in over mpsc with a oneshot reply,
// and observable state comes back on a watch channel. Topology events from
// the monitor are interleaved with commands on the same task, so a
// reconciliation can never overlap a start or stop.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::devices::backend::AudioBackend;
use super::devices::types::OutputDevice;
use super::monitor::MonitorEvent;
use super::session::AggregateSession;
use super::sharing::{Collaborators, SharingService, SharingStatus};
use super::volume_keys::VolumeDirection;
use crate::config::SharingConfig;
use crate::error::{Result, SharingError};

const COMMAND_BUFFER: usize = 32;

/// Signals a shortcut source can deliver. Key codes never get this far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortcutSignal {
    ToggleSharing,
    VolumeStep(VolumeDirection),
}

#[derive(Debug)]
pub enum SharingCommand {
    ListDevices {
        reply: oneshot::Sender<Result<Vec<OutputDevice>>>,
    },
    StartSharing {
        devices: Vec<OutputDevice>,
        reply: oneshot::Sender<Result<AggregateSession>>,
    },
    StopSharing {
        reply: oneshot::Sender<bool>,
    },
    Toggle {
        reply: oneshot::Sender<Result<bool>>,
    },
    SetAutoShare {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    GetVolume {
        uid: String,
        reply: oneshot::Sender<Option<f32>>,
    },
    SetVolume {
        uid: String,
        value: f32,
        reply: oneshot::Sender<Result<()>>,
    },
    CanControlVolume {
        uid: String,
        reply: oneshot::Sender<bool>,
    },
    VolumeStep {
        direction: VolumeDirection,
        reply: oneshot::Sender<usize>,
    },
    /// Raw system media-key event (subtype and `data1`)
    MediaKey {
        subtype: i16,
        data1: i64,
        reply: oneshot::Sender<usize>,
    },
    Reconcile {
        reply: oneshot::Sender<()>,
    },
    ApplyFavorite {
        name: String,
        reply: oneshot::Sender<Result<AggregateSession>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub struct SharingController;

impl SharingController {
    /// Start the owner task. Must be called from inside a tokio runtime.
    pub fn spawn(
        config: SharingConfig,
        backend: Arc<dyn AudioBackend>,
        collaborators: Collaborators,
    ) -> (SharingHandle, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();

        let service = SharingService::new(config, backend, collaborators, monitor_tx);
        let status = service.subscribe();
        let task = tokio::spawn(run(service, command_rx, monitor_rx));

        (SharingHandle { commands, status }, task)
    }
}

async fn run(
    mut service: SharingService,
    mut commands: mpsc::Receiver<SharingCommand>,
    mut monitor_events: mpsc::UnboundedReceiver<MonitorEvent>,
) {
    service.startup().await;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All sharing handles dropped");
                    service.shutdown();
                    break;
                };
                if !dispatch(&mut service, command).await {
                    break;
                }
            }
            Some(event) = monitor_events.recv() => {
                service.handle_monitor_event(event);
            }
        }
    }

    info!("{} Controller task finished", "SHARE_SHUTDOWN".bright_red());
}

/// Returns false once the controller should exit
async fn dispatch(service: &mut SharingService, command: SharingCommand) -> bool {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        SharingCommand::ListDevices { reply } => {
            let _ = reply.send(service.list_output_devices());
        }
        SharingCommand::StartSharing { devices, reply } => {
            let _ = reply.send(service.start_sharing(&devices, true).await);
        }
        SharingCommand::StopSharing { reply } => {
            let _ = reply.send(service.stop_sharing(None, false));
        }
        SharingCommand::Toggle { reply } => {
            let _ = reply.send(service.toggle().await);
        }
        SharingCommand::SetAutoShare { enabled, reply } => {
            service.set_auto_share(enabled);
            let _ = reply.send(());
        }
        SharingCommand::GetVolume { uid, reply } => {
            let _ = reply.send(service.get_volume(&uid));
        }
        SharingCommand::SetVolume { uid, value, reply } => {
            let _ = reply.send(service.set_volume(&uid, value));
        }
        SharingCommand::CanControlVolume { uid, reply } => {
            let _ = reply.send(service.can_control_volume(&uid));
        }
        SharingCommand::VolumeStep { direction, reply } => {
            let _ = reply.send(service.volume_step(direction));
        }
        SharingCommand::MediaKey {
            subtype,
            data1,
            reply,
        } => {
            let _ = reply.send(service.media_key(subtype, data1));
        }
        SharingCommand::Reconcile { reply } => {
            service.reconcile();
            let _ = reply.send(());
        }
        SharingCommand::ApplyFavorite { name, reply } => {
            let _ = reply.send(service.apply_favorite(&name).await);
        }
        SharingCommand::Shutdown { reply } => {
            service.shutdown();
            let _ = reply.send(());
            return false;
        }
    }
    true
}

/// Cloneable front door to the controller task
#[derive(Debug, Clone)]
pub struct SharingHandle {
    commands: mpsc::Sender<SharingCommand>,
    status: watch::Receiver<SharingStatus>,
}

impl SharingHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SharingCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SharingError::ControllerUnavailable)?;
        response.await.map_err(|_| SharingError::ControllerUnavailable)
    }

    pub async fn list_output_devices(&self) -> Result<Vec<OutputDevice>> {
        self.request(|reply| SharingCommand::ListDevices { reply })
            .await?
    }

    /// Start a user-initiated session; the first device is the clock master
    pub async fn start_sharing(&self, devices: Vec<OutputDevice>) -> Result<AggregateSession> {
        self.request(|reply| SharingCommand::StartSharing { devices, reply })
            .await?
    }

    /// Returns whether a live session was stopped
    pub async fn stop_sharing(&self) -> Result<bool> {
        self.request(|reply| SharingCommand::StopSharing { reply })
            .await
    }

    pub async fn toggle_sharing(&self) -> Result<bool> {
        self.request(|reply| SharingCommand::Toggle { reply }).await?
    }

    pub async fn set_auto_share(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SharingCommand::SetAutoShare { enabled, reply })
            .await
    }

    pub async fn get_volume(&self, uid: &str) -> Result<Option<f32>> {
        let uid = uid.to_string();
        self.request(|reply| SharingCommand::GetVolume { uid, reply })
            .await
    }

    pub async fn set_volume(&self, uid: &str, value: f32) -> Result<()> {
        let uid = uid.to_string();
        self.request(|reply| SharingCommand::SetVolume { uid, value, reply })
            .await?
    }

    pub async fn can_control_volume(&self, uid: &str) -> Result<bool> {
        let uid = uid.to_string();
        self.request(|reply| SharingCommand::CanControlVolume { uid, reply })
            .await
    }

    pub async fn volume_step(&self, direction: VolumeDirection) -> Result<usize> {
        self.request(|reply| SharingCommand::VolumeStep { direction, reply })
            .await
    }

    /// Forward a system media-key event from the key tap. Returns how many
    /// devices changed volume.
    pub async fn media_key(&self, subtype: i16, data1: i64) -> Result<usize> {
        self.request(|reply| SharingCommand::MediaKey {
            subtype,
            data1,
            reply,
        })
        .await
    }

    /// Reconcile now instead of waiting for a device-list change
    pub async fn reconcile(&self) -> Result<()> {
        self.request(|reply| SharingCommand::Reconcile { reply })
            .await
    }

    pub async fn apply_favorite(&self, name: &str) -> Result<AggregateSession> {
        let name = name.to_string();
        self.request(|reply| SharingCommand::ApplyFavorite { name, reply })
            .await?
    }

    /// Deliver a shortcut press
    pub async fn shortcut(&self, signal: ShortcutSignal) -> Result<()> {
        match signal {
            ShortcutSignal::ToggleSharing => self.toggle_sharing().await.map(|_| ()),
            ShortcutSignal::VolumeStep(direction) => self.volume_step(direction).await.map(|_| ()),
        }
    }

    /// Stop sharing and end the controller task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SharingCommand::Shutdown { reply })
            .await
    }

    pub fn status(&self) -> SharingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SharingStatus> {
        self.status.clone()
    }
}
