use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where accepted enrollment stills are written.
    pub stills_dir: PathBuf,
    /// Base URL of the hosted checkpoint service.
    pub checkpoint_url: String,
    /// Timeout in seconds for a single checkpoint call.
    pub checkpoint_timeout_secs: u64,
    /// Minimum verification confidence for an accepted attendance match.
    pub confidence_threshold: f32,
    /// Default quiz duration in seconds when the caller does not set one.
    pub quiz_duration_secs: u32,
}

impl Config {
    /// Load configuration from `INVIGIL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("invigil");

        let db_path = std::env::var("INVIGIL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("invigil.db"));

        let stills_dir = std::env::var("INVIGIL_STILLS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("stills"));

        Self {
            camera_device: std::env::var("INVIGIL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            db_path,
            stills_dir,
            checkpoint_url: std::env::var("INVIGIL_CHECKPOINT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8750".to_string()),
            checkpoint_timeout_secs: env_u64("INVIGIL_CHECKPOINT_TIMEOUT_SECS", 10),
            confidence_threshold: env_f32(
                "INVIGIL_CONFIDENCE_THRESHOLD",
                invigil_core::CONFIDENCE_THRESHOLD,
            ),
            quiz_duration_secs: env_u32("INVIGIL_QUIZ_DURATION_SECS", 600),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
