use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by [`crate::session::SessionManager::ensure_ready`]
///
/// Filesystem teardown failures never appear here; they are logged, and the next cold start
/// for the same stream clears the leftovers.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream {0} not found")]
    NotFound(String),

    #[error("stream {stream_id} produced no manifest within {waited:?}")]
    StartupTimeout { stream_id: String, waited: Duration },

    #[error("transcoder for stream {stream_id} failed: {reason}")]
    ProcessFailure { stream_id: String, reason: String },

    #[error("session for stream {0} was invalidated while starting")]
    Invalidated(String),

    #[error("stream catalog unavailable")]
    Catalog(#[source] anyhow::Error),

    #[error("failed to launch transcoder for stream {stream_id}")]
    Spawn {
        stream_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl StreamError {
    /// Whether a client may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StreamError::NotFound(_))
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
