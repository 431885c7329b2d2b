// Preference storage for sharing
//
// The controller treats every record as an opaque list of device UIDs. The
// on-disk format is a single JSON document rewritten on each change.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, SharingError};

/// Everything persisted between launches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SharingPreferences {
    pub last_selected_device_uids: Vec<String>,
    pub favorites: BTreeMap<String, Vec<String>>,
    pub auto_restore_on_launch: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn last_selected_device_uids(&self) -> Result<Vec<String>>;
    async fn set_last_selected_device_uids(&self, uids: &[String]) -> Result<()>;

    async fn favorites(&self) -> Result<BTreeMap<String, Vec<String>>>;
    async fn set_favorite(&self, name: &str, uids: &[String]) -> Result<()>;
    async fn remove_favorite(&self, name: &str) -> Result<()>;

    async fn auto_restore_on_launch(&self) -> Result<bool>;
    async fn set_auto_restore_on_launch(&self, enabled: bool) -> Result<()>;
}

/// Volatile store, for tests and hosts that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryPreferencesStore {
    preferences: Mutex<SharingPreferences>,
}

impl MemoryPreferencesStore {
    pub fn new(preferences: SharingPreferences) -> Self {
        Self {
            preferences: Mutex::new(preferences),
        }
    }

    pub async fn snapshot(&self) -> SharingPreferences {
        self.preferences.lock().await.clone()
    }
}

#[async_trait]
impl PreferencesStore for MemoryPreferencesStore {
    async fn last_selected_device_uids(&self) -> Result<Vec<String>> {
        Ok(self.preferences.lock().await.last_selected_device_uids.clone())
    }

    async fn set_last_selected_device_uids(&self, uids: &[String]) -> Result<()> {
        let mut prefs = self.preferences.lock().await;
        prefs.last_selected_device_uids = uids.to_vec();
        prefs.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn favorites(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.preferences.lock().await.favorites.clone())
    }

    async fn set_favorite(&self, name: &str, uids: &[String]) -> Result<()> {
        let mut prefs = self.preferences.lock().await;
        prefs.favorites.insert(name.to_string(), uids.to_vec());
        prefs.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn remove_favorite(&self, name: &str) -> Result<()> {
        let mut prefs = self.preferences.lock().await;
        prefs.favorites.remove(name);
        prefs.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn auto_restore_on_launch(&self) -> Result<bool> {
        Ok(self.preferences.lock().await.auto_restore_on_launch)
    }

    async fn set_auto_restore_on_launch(&self, enabled: bool) -> Result<()> {
        let mut prefs = self.preferences.lock().await;
        prefs.auto_restore_on_launch = enabled;
        prefs.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// JSON file store with an in-memory copy of the document
#[derive(Debug)]
pub struct JsonPreferencesStore {
    path: PathBuf,
    preferences: Mutex<SharingPreferences>,
}

impl JsonPreferencesStore {
    /// Load the document at `path`; a missing file starts from defaults
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let preferences = match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<SharingPreferences>(&bytes) {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!(
                        "{} Unreadable preferences at {}, starting fresh: {}",
                        "PREFS_WARN".bright_yellow(),
                        path.display(),
                        e
                    );
                    SharingPreferences::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SharingPreferences::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        info!(
            "{} Loaded preferences from {} ({} favorites)",
            "PREFS_LOAD".bright_blue(),
            path.display(),
            preferences.favorites.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            preferences: Mutex::new(preferences),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy, write it, and only then adopt it. A failed
    /// write leaves memory matching the file.
    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SharingPreferences) + Send,
    {
        let mut prefs = self.preferences.lock().await;
        let mut next = prefs.clone();
        change(&mut next);
        next.updated_at = Some(Utc::now());
        self.persist(&next).await?;
        *prefs = next;
        Ok(())
    }

    async fn persist(&self, prefs: &SharingPreferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SharingError::Preferences(format!("create {}: {}", parent.display(), e)))?;
        }
        let bytes = serde_json::to_vec_pretty(prefs)
            .map_err(|e| SharingError::Preferences(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| SharingError::Preferences(format!("write {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl PreferencesStore for JsonPreferencesStore {
    async fn last_selected_device_uids(&self) -> Result<Vec<String>> {
        Ok(self.preferences.lock().await.last_selected_device_uids.clone())
    }

    async fn set_last_selected_device_uids(&self, uids: &[String]) -> Result<()> {
        let uids = uids.to_vec();
        self.update(move |prefs| prefs.last_selected_device_uids = uids)
            .await
    }

    async fn favorites(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.preferences.lock().await.favorites.clone())
    }

    async fn set_favorite(&self, name: &str, uids: &[String]) -> Result<()> {
        let name = name.to_string();
        let uids = uids.to_vec();
        self.update(move |prefs| {
            prefs.favorites.insert(name, uids);
        })
        .await
    }

    async fn remove_favorite(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.update(move |prefs| {
            prefs.favorites.remove(&name);
        })
        .await
    }

    async fn auto_restore_on_launch(&self) -> Result<bool> {
        Ok(self.preferences.lock().await.auto_restore_on_launch)
    }

    async fn set_auto_restore_on_launch(&self, enabled: bool) -> Result<()> {
        self.update(move |prefs| prefs.auto_restore_on_launch = enabled)
            .await
    }
}
