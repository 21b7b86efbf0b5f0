use crate::config::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for the session lifecycle manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding one output directory per live stream
    pub output_root: PathBuf,

    /// File name of the playlist inside each output directory
    pub manifest_name: String,

    /// How long a cold start may take before the session is abandoned
    pub startup_timeout: Duration,

    /// Sliding inactivity window; every viewer request pushes the deadline forward
    pub idle_timeout: Duration,

    /// How often the readiness gate checks for the manifest
    pub poll_interval: Duration,

    /// Upper bound on how long the reaper sleeps between expiry checks
    pub sweep_interval: Duration,
}

impl SessionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            output_root: cfg.hls.output_root.clone(),
            manifest_name: cfg.hls.manifest_name.clone(),
            startup_timeout: cfg.sessions.startup_timeout(),
            idle_timeout: cfg.sessions.idle_timeout(),
            poll_interval: cfg.sessions.poll_interval(),
            sweep_interval: cfg.sessions.sweep_interval(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
