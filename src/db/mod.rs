// Persistence for user-facing sharing preferences

pub mod preferences;

pub use preferences::{
    JsonPreferencesStore, MemoryPreferencesStore, PreferencesStore, SharingPreferences,
};
