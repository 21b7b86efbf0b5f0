use crate::catalog::StreamMetadata;
use crate::transcode::TranscodeHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const UNARMED: u64 = u64::MAX;
const MAX_DEADLINE_MS: u64 = u64::MAX - 1;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Ready,
    Terminating,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Ready,
            _ => SessionState::Terminating,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Starting => 0,
            SessionState::Ready => 1,
            SessionState::Terminating => 2,
        }
    }
}

/// Why a session stopped being usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Transcoder reported an error
    Failed(String),
    /// Transcoder exited on its own
    Ended,
    /// Torn down by invalidation, expiry or shutdown
    Invalidated,
}

/// A live transcoding process plus its output artifacts for one stream
pub struct Session {
    pub stream_id: String,

    /// Distinguishes successive sessions for the same stream id
    pub generation: u64,

    /// Sources this session was built from
    pub video_url: String,
    pub radio_url: String,

    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,

    pub started_at: DateTime<Utc>,

    handle: TranscodeHandle,

    state: AtomicU8,

    /// Reference point for `deadline_ms`
    created: Instant,

    /// Expiry deadline in milliseconds since `created`
    deadline_ms: AtomicU64,

    /// First cause of death wins; observed by the readiness gate
    end_tx: watch::Sender<Option<SessionEnd>>,
}

impl Session {
    pub fn new(
        metadata: &StreamMetadata,
        generation: u64,
        output_dir: PathBuf,
        manifest_path: PathBuf,
        handle: TranscodeHandle,
    ) -> Self {
        let (end_tx, _) = watch::channel(None);

        Self {
            stream_id: metadata.id.clone(),
            generation,
            video_url: metadata.video_url.clone(),
            radio_url: metadata.radio_url.clone(),
            output_dir,
            manifest_path,
            started_at: Utc::now(),
            handle,
            state: AtomicU8::new(SessionState::Starting.as_u8()),
            created: Instant::now(),
            deadline_ms: AtomicU64::new(UNARMED),
            end_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Starting → Ready`, arming the inactivity deadline. Returns false if the session already
    /// moved on to `Terminating`.
    pub fn mark_ready(&self, idle_timeout: Duration) -> bool {
        self.renew(idle_timeout);
        self.state
            .compare_exchange(
                SessionState::Starting.as_u8(),
                SessionState::Ready.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn mark_terminating(&self) {
        self.state
            .store(SessionState::Terminating.as_u8(), Ordering::SeqCst);
    }

    /// Push the expiry deadline to `now + idle_timeout`, saturating for huge timeouts
    pub fn renew(&self, idle_timeout: Duration) {
        let deadline = self.created.elapsed().saturating_add(idle_timeout);
        let ms = u64::try_from(deadline.as_millis()).unwrap_or(MAX_DEADLINE_MS);
        self.deadline_ms
            .store(ms.min(MAX_DEADLINE_MS), Ordering::SeqCst);
    }

    /// `None` while unarmed, or when the deadline lies beyond what `Instant` can represent
    pub fn deadline(&self) -> Option<Instant> {
        match self.deadline_ms.load(Ordering::SeqCst) {
            UNARMED => None,
            ms => self.created.checked_add(Duration::from_millis(ms)),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Record why the session died. Later causes are ignored.
    pub fn end(&self, cause: SessionEnd) {
        self.end_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(cause);
                true
            } else {
                false
            }
        });
    }

    pub fn ended(&self) -> Option<SessionEnd> {
        self.end_tx.borrow().clone()
    }

    pub fn subscribe_end(&self) -> watch::Receiver<Option<SessionEnd>> {
        self.end_tx.subscribe()
    }

    /// Ask the transcoder to stop; idempotent
    pub fn stop_process(&self) {
        self.handle.stop();
    }

    /// Whether this session can answer a viewer asking for `metadata` right now
    ///
    /// Does not touch the filesystem; callers check the manifest separately.
    pub fn serves(&self, metadata: &StreamMetadata) -> bool {
        self.state() == SessionState::Ready
            && self.ended().is_none()
            && self.video_url == metadata.video_url
            && self.radio_url == metadata.radio_url
    }

    pub fn info(&self) -> SessionInfo {
        let expires_in_secs = self
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs());

        SessionInfo {
            stream_id: self.stream_id.clone(),
            state: self.state(),
            video_url: self.video_url.clone(),
            radio_url: self.radio_url.clone(),
            manifest_path: self.manifest_path.clone(),
            started_at: self.started_at,
            expires_in_secs,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub stream_id: String,
    pub state: SessionState,
    pub video_url: String,
    pub radio_url: String,
    pub manifest_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub expires_in_secs: Option<u64>,
}
