pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod notifications;
pub mod permissions;

pub use audio::{
    AggregateSession, Collaborators, OutputDevice, SessionState, SharingController, SharingHandle,
    SharingStatus, ShortcutSignal, VolumeDirection,
};
pub use config::SharingConfig;
pub use error::{Result, SharingError};

use colored::Colorize;
use std::sync::Arc;
use tracing::{error, info};

use audio::devices::AudioBackend;
use db::JsonPreferencesStore;

#[cfg(target_os = "macos")]
fn platform_backend() -> anyhow::Result<Arc<dyn AudioBackend>> {
    Ok(Arc::new(audio::devices::CoreAudioBackend::new()))
}

#[cfg(not(target_os = "macos"))]
fn platform_backend() -> anyhow::Result<Arc<dyn AudioBackend>> {
    Err(anyhow::anyhow!("CoreAudio not available on this platform"))
}

/// Run the sharing controller until Ctrl-C
pub async fn run() -> anyhow::Result<()> {
    log::init_tracing();
    if std::env::var("AUDIO_SHARE_DEBUG").is_ok() {
        log::set_share_debug(true);
    }

    let config = SharingConfig::from_env();
    info!(
        "{} Starting AudioShare (debounce {:?}, auto-share {})",
        "APP_START".bright_blue(),
        config.debounce,
        config.auto_share_enabled
    );

    let backend = platform_backend()?;
    let preferences = JsonPreferencesStore::open(&config.preferences_path).await?;
    info!(
        "{} Preferences at {}",
        "APP_START".bright_blue(),
        preferences.path().display()
    );
    let collaborators = Collaborators {
        preferences: Arc::new(preferences),
        ..Default::default()
    };

    let (handle, task) = SharingController::spawn(config, backend, collaborators);

    match handle.list_output_devices().await {
        Ok(devices) => {
            for device in &devices {
                info!(
                    "  {} {} ({}){}",
                    "DEVICE".bright_cyan(),
                    device.name,
                    device.uid,
                    if device.is_target_class { " [earbuds]" } else { "" }
                );
            }
        }
        Err(e) => error!("{} {}", "DEVICE_LIST_ERROR".bright_red(), e),
    }

    tokio::signal::ctrl_c().await?;
    info!("{} Shutting down", "APP_STOP".bright_red());
    handle.shutdown().await?;
    task.await?;
    Ok(())
}
