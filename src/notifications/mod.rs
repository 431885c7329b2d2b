// User notifications about sharing state
//
// Delivery belongs to the host application. The controller fires events and
// moves on: `notify` must never block and has no delivery guarantee.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Events worth telling the user about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SharingEvent {
    SharingStarted { device_count: usize },
    SharingStopped,
    DeviceDisconnected { name: String },
    NewDeviceConnected { name: String },
}

impl SharingEvent {
    /// Short title for a notification banner
    pub fn title(&self) -> &'static str {
        match self {
            SharingEvent::SharingStarted { .. } => "Sharing started",
            SharingEvent::SharingStopped => "Sharing stopped",
            SharingEvent::DeviceDisconnected { .. } => "Device disconnected",
            SharingEvent::NewDeviceConnected { .. } => "New device connected",
        }
    }

    pub fn body(&self) -> String {
        match self {
            SharingEvent::SharingStarted { device_count } => {
                format!("Audio is playing on {} devices", device_count)
            }
            SharingEvent::SharingStopped => "Audio is back on your usual output".to_string(),
            SharingEvent::DeviceDisconnected { name } => {
                format!("{} disconnected, sharing paused", name)
            }
            SharingEvent::NewDeviceConnected { name } => format!("{} is ready to share", name),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: SharingEvent);
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: SharingEvent) {
        info!(
            "{} {}: {}",
            "NOTIFY".bright_magenta(),
            event.title(),
            event.body()
        );
    }
}

/// Forwards notifications to a channel, for hosts that deliver them on
/// their own task
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<SharingEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SharingEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: SharingEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(event);
    }
}
