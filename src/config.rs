use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub hls: HlsConfig,
    pub transcoder: TranscoderConfig,
    pub sessions: SessionsConfig,
    /// Streams registered in the catalog at boot
    pub streams: Vec<SeedStream>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "stream-mixer".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Output layout and segmenting parameters for the HLS muxer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Directory holding one sub-directory per live stream
    pub output_root: PathBuf,
    pub manifest_name: String,
    pub segment_secs: u32,
    /// Number of segments kept in the rolling playlist window
    pub list_size: u32,
    pub audio_bitrate: String,
    pub start_number: u32,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("public/stream"),
            manifest_name: "index.m3u8".to_string(),
            segment_secs: 6,
            list_size: 10,
            audio_bitrate: "128k".to_string(),
            start_number: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    pub log_level: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            log_level: "error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub startup_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 10_000,
            idle_timeout_secs: 300, // 5 minutes without a viewer
            poll_interval_ms: 200,
            sweep_interval_ms: 1_000,
        }
    }
}

impl SessionsConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedStream {
    pub name: String,
    pub video_url: String,
    pub radio_url: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl Config {
    /// Load configuration from `path` (any format the `config` crate understands) with
    /// `STREAM_MIXER__SECTION__KEY` environment overrides on top. A missing file is not an error.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("STREAM_MIXER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
