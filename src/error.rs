// Error taxonomy for the sharing controller
//
// Routine failures (enumeration hiccups, unreadable volumes) degrade to
// `None` at the call site. Only the variants below ever reach a caller.

/// Errors surfaced by the sharing controller and its device layer
#[derive(Debug, thiserror::Error)]
pub enum SharingError {
    #[error("Device not found: {uid}")]
    DeviceNotFound { uid: String },

    #[error("Failed to create aggregate device: {reason}")]
    AggregateCreationFailed { reason: String },

    #[error("Core Audio property query failed: OSStatus {status}")]
    PropertyQueryFailed { status: i32 },

    #[error("Sharing needs at least two output devices (got {count})")]
    InvalidDevice { count: usize },

    #[error("Access denied - sharing is not currently allowed")]
    AccessDenied,

    #[error("Preferences error: {0}")]
    Preferences(String),

    #[error("Sharing controller is no longer running")]
    ControllerUnavailable,

    #[error("Audio backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SharingError>;
