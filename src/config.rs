use std::path::PathBuf;
use std::time::Duration;

/// UID reserved for the aggregate this process creates. Anything carrying it
/// is ours, including leftovers from a crashed run.
pub const RESERVED_AGGREGATE_UID: &str = "com.audioshare.multi-output";
pub const RESERVED_AGGREGATE_NAME: &str = "AudioShare Output";

/// Nominal rates probed in order when aligning members
pub const PREFERRED_SAMPLE_RATES_HZ: [f64; 4] = [48000.0, 44100.0, 32000.0, 16000.0];

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone)]
pub struct SharingConfig {
    /// Identity of the aggregate device
    pub aggregate_uid: String,
    pub aggregate_name: String,

    /// How long the device list must stay quiet before reconciling
    pub debounce: Duration,

    /// Sample rates tried in order; the first one every member supports wins
    pub preferred_sample_rates: Vec<f64>,

    /// Case-insensitive name fragments marking wireless earbud/headphone devices
    pub target_name_patterns: Vec<String>,

    /// Volume change applied per media key press
    pub volume_step: f32,

    /// Start sharing automatically when new target-class devices connect
    pub auto_share_enabled: bool,

    /// Where the JSON preferences store lives
    pub preferences_path: PathBuf,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            aggregate_uid: RESERVED_AGGREGATE_UID.to_string(),
            aggregate_name: RESERVED_AGGREGATE_NAME.to_string(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            preferred_sample_rates: PREFERRED_SAMPLE_RATES_HZ.to_vec(),
            target_name_patterns: vec![
                "airpods".to_string(),
                "beats".to_string(),
                "buds".to_string(),
                "headphones".to_string(),
            ],
            volume_step: 1.0 / 16.0,
            auto_share_enabled: false,
            preferences_path: default_preferences_path(),
        }
    }
}

impl SharingConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = std::env::var("AUDIO_SHARE_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.debounce = Duration::from_millis(ms);
        }

        if let Ok(value) = std::env::var("AUDIO_SHARE_AUTO_SHARE") {
            config.auto_share_enabled = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        }

        if let Ok(path) = std::env::var("AUDIO_SHARE_PREFS") {
            config.preferences_path = PathBuf::from(path);
        }

        config
    }
}

fn default_preferences_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("audio-share")
        .join("preferences.json")
}
