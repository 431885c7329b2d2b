use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,audio_share_lib=debug";

/// Global flag to control verbose device logging
pub static SHARE_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Set verbose device logging on/off
pub fn set_share_debug(enabled: bool) {
    SHARE_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    info!(
        "🔧 Device debug logging {}",
        if enabled { "ENABLED" } else { "DISABLED" }
    );
}

/// Check if verbose device logging is enabled
pub fn is_share_debug_enabled() -> bool {
    SHARE_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Device debug macro - only logs if device debug is enabled
#[macro_export]
macro_rules! share_debug {
    ($($arg:tt)*) => {
        if $crate::log::SHARE_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_debug_flag_toggles() {
        set_share_debug(true);
        assert!(is_share_debug_enabled());
        set_share_debug(false);
        assert!(!is_share_debug_enabled());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
