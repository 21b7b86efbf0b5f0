//! Transcoding process adapter
//!
//! A [`Transcoder`] turns a video source and a radio source into a rolling HLS playlist inside
//! an output directory. Starting one returns immediately; lifecycle changes arrive later as
//! [`TranscodeEvent`]s on the returned channel.

mod ffmpeg;

pub use ffmpeg::{ffmpeg_args, FfmpegTranscoder};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Everything needed to launch one transcoding session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub stream_id: String,
    pub video_url: String,
    pub radio_url: String,
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Lifecycle notifications from a running transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    /// Process launched (informational)
    Started { pid: Option<u32>, command: String },
    /// Process failed; the session is dead
    Errored(String),
    /// Process exited on its own
    Ended,
}

/// Control handle for a running transcoder
///
/// Cloning shares the same underlying stop flag.
#[derive(Debug, Clone)]
pub struct TranscodeHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl TranscodeHandle {
    /// Create a handle plus the receiver the supervising task watches for stop requests
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                stop_tx: Arc::new(stop_tx),
            },
            stop_rx,
        )
    }

    /// Request termination. Never blocks, safe to repeat and safe on a dead process.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// A started transcoder: its control handle and event stream
pub struct Transcoding {
    pub handle: TranscodeHandle,
    pub events: mpsc::Receiver<TranscodeEvent>,
}

/// Transcoding engine trait
///
/// Implementations:
/// - [`FfmpegTranscoder`]: spawns an `ffmpeg` subprocess
/// - test doubles that write a manifest themselves
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Launch a transcoding session; does not wait for the manifest to appear
    async fn start(&self, request: TranscodeRequest) -> Result<Transcoding>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent() {
        let (handle, rx) = TranscodeHandle::new();
        assert!(!handle.is_stopped());

        handle.stop();
        handle.stop();

        assert!(handle.is_stopped());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_stop_after_receiver_dropped() {
        let (handle, rx) = TranscodeHandle::new();
        drop(rx);

        handle.stop();
        assert!(handle.is_stopped());
    }
}
