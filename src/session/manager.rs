use super::config::SessionConfig;
use super::readiness::{await_manifest, Readiness};
use super::session::{Session, SessionEnd, SessionInfo, SessionState};
use super::store::SessionStore;
use crate::catalog::{StreamCatalog, StreamMetadata};
use crate::error::{StreamError, StreamResult};
use crate::transcode::{TranscodeEvent, TranscodeRequest, Transcoder};
use anyhow::{Context, Result};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest the reaper sleeps when `sweep_interval` is out of range
const MAX_REAPER_NAP: Duration = Duration::from_secs(3600);

/// Owns every transcoding session and decides when they start and stop
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Arc<dyn StreamCatalog>,
    transcoder: Arc<dyn Transcoder>,
    store: SessionStore,
    config: SessionConfig,

    /// Source of session generation numbers
    generation: AtomicU64,

    /// Wakes the reaper when a new deadline is armed
    reaper_wake: Notify,

    shutdown_tx: watch::Sender<bool>,

    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

/// Why a session is being torn down; decides which sessions qualify
#[derive(Debug, Clone, Copy)]
enum Teardown {
    /// Metadata changed or was deleted
    Invalidated,
    /// Inactivity deadline of this generation passed
    Expired(u64),
    /// The transcoder of this generation errored or ended
    ProcessExit(u64),
    Shutdown,
}

impl Teardown {
    fn applies_to(self, session: &Session) -> bool {
        match self {
            Teardown::Invalidated | Teardown::Shutdown => true,
            Teardown::Expired(generation) => {
                session.generation == generation
                    && session.state() == SessionState::Ready
                    && session.is_expired(Instant::now())
            }
            Teardown::ProcessExit(generation) => session.generation == generation,
        }
    }
}

impl fmt::Display for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::Invalidated => write!(f, "invalidated"),
            Teardown::Expired(_) => write!(f, "inactivity"),
            Teardown::ProcessExit(_) => write!(f, "transcoder exited"),
            Teardown::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl SessionManager {
    /// Create the output root and start the expiry reaper
    pub async fn start(
        catalog: Arc<dyn StreamCatalog>,
        transcoder: Arc<dyn Transcoder>,
        config: SessionConfig,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.output_root)
            .await
            .with_context(|| {
                format!("Failed to create output root {}", config.output_root.display())
            })?;

        info!(
            "Session manager started: output={} idle={:?} startup={:?}",
            config.output_root.display(),
            config.idle_timeout,
            config.startup_timeout
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            catalog,
            transcoder,
            store: SessionStore::new(),
            config,
            generation: AtomicU64::new(0),
            reaper_wake: Notify::new(),
            shutdown_tx,
            reaper_task: Mutex::new(None),
        });

        let reaper = tokio::spawn(reap(Arc::downgrade(&inner), shutdown_rx));
        *inner.reaper_task.lock().await = Some(reaper);

        Ok(Self { inner })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Resolve `stream_id` to a manifest that exists on disk, cold-starting a session if needed
    pub async fn ensure_ready(&self, stream_id: &str) -> StreamResult<PathBuf> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(StreamError::Invalidated(stream_id.to_string()));
        }

        let metadata = self
            .inner
            .catalog
            .get_stream_by_id(stream_id)
            .await
            .map_err(StreamError::Catalog)?
            .ok_or_else(|| StreamError::NotFound(stream_id.to_string()))?;

        let idle_timeout = self.inner.config.idle_timeout;

        // Warm path: no gate
        let mut missing_manifest = None;
        if let Some(session) = self.inner.store.get(stream_id) {
            if session.serves(&metadata) {
                if manifest_exists(&session.manifest_path).await {
                    session.renew(idle_timeout);
                    debug!("Renewed session for stream {}", stream_id);
                    return Ok(session.manifest_path.clone());
                }
                warn!(
                    "Manifest of stream {} vanished, restarting session",
                    stream_id
                );
                missing_manifest = Some(session.generation);
            }
        }

        let inner = &self.inner;
        let created = inner
            .store
            .get_or_create(
                stream_id,
                |session| {
                    session.serves(&metadata) && Some(session.generation) != missing_manifest
                },
                |guard| inner.cold_start(guard, &metadata),
            )
            .await;

        let session = match created {
            Ok(session) => session,
            Err(e) => {
                inner.store.prune(stream_id);
                return Err(e);
            }
        };

        session.renew(idle_timeout);
        Ok(session.manifest_path.clone())
    }

    /// Tear down whatever runs for `stream_id` and remove its artifacts
    ///
    /// Safe to call when no session exists. A cold start in progress or queued for the stream
    /// is interrupted and its caller receives [`StreamError::Invalidated`].
    pub async fn invalidate(&self, stream_id: &str) {
        // Interrupt pending cold starts before queueing on the gate they hold
        if let Some(session) = self.inner.store.cancel(stream_id) {
            session.end(SessionEnd::Invalidated);
        }

        self.inner.teardown(stream_id, Teardown::Invalidated).await;
    }

    /// Slide the expiry of a ready session, returning its output directory
    pub fn touch(&self, stream_id: &str) -> Option<PathBuf> {
        let session = self.inner.store.get(stream_id)?;
        if session.state() != SessionState::Ready || session.ended().is_some() {
            return None;
        }
        session.renew(self.inner.config.idle_timeout);
        Some(session.output_dir.clone())
    }

    pub fn session(&self, stream_id: &str) -> Option<SessionInfo> {
        self.inner.store.get(stream_id).map(|session| session.info())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.inner.store.all().iter().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        sessions
    }

    /// Where the artifacts of `stream_id` live, whether or not a session runs
    pub fn output_dir(&self, stream_id: &str) -> PathBuf {
        self.inner.output_dir(stream_id)
    }

    /// Stop the reaper and tear down every session. Later `ensure_ready` calls fail.
    pub async fn shutdown(&self) {
        info!("Shutting down session manager");
        self.inner.shutdown_tx.send_replace(true);

        if let Some(task) = self.inner.reaper_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Reaper task panicked: {}", e);
            }
        }

        let sessions = self.inner.store.all();
        for session in &sessions {
            session.end(SessionEnd::Invalidated);
        }
        futures::future::join_all(
            sessions
                .iter()
                .map(|session| self.inner.teardown(&session.stream_id, Teardown::Shutdown)),
        )
        .await;

        info!("Session manager stopped");
    }
}

impl Inner {
    fn output_dir(&self, stream_id: &str) -> PathBuf {
        self.config.output_root.join(sanitize_stream_id(stream_id))
    }

    /// Start a transcoder for `metadata` and wait for its first manifest. Runs with the
    /// stream's gate held, so concurrent requests queue behind it and reuse the result.
    async fn cold_start(
        self: &Arc<Self>,
        mut guard: super::store::SlotGuard,
        metadata: &StreamMetadata,
    ) -> StreamResult<Arc<Session>> {
        let stream_id = metadata.id.as_str();

        // Metadata was read before an invalidation that reached the gate first
        if guard.is_cancelled() {
            return Err(StreamError::Invalidated(stream_id.to_string()));
        }

        if let Some(stale) = guard.current() {
            info!(
                "Replacing session generation {} for stream {}",
                stale.generation, stream_id
            );
            stale.mark_terminating();
            guard.take();
            dispose(&stale).await;
        }

        let output_dir = self.output_dir(stream_id);
        let manifest_path = output_dir.join(&self.config.manifest_name);

        prepare_output_dir(&output_dir)
            .await
            .map_err(|source| StreamError::Spawn {
                stream_id: stream_id.to_string(),
                source,
            })?;

        info!(
            "Starting {} session for stream {} ({})",
            self.transcoder.name(),
            stream_id,
            metadata.slug
        );

        let request = TranscodeRequest {
            stream_id: stream_id.to_string(),
            video_url: metadata.video_url.clone(),
            radio_url: metadata.radio_url.clone(),
            output_dir: output_dir.clone(),
            manifest_path: manifest_path.clone(),
        };

        let transcoding = match self.transcoder.start(request).await {
            Ok(transcoding) => transcoding,
            Err(source) => {
                error!("Failed to start transcoder for stream {}: {:#}", stream_id, source);
                remove_output_dir(&output_dir).await;
                return Err(StreamError::Spawn {
                    stream_id: stream_id.to_string(),
                    source,
                });
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(
            metadata,
            generation,
            output_dir,
            manifest_path.clone(),
            transcoding.handle,
        ));
        guard.insert(Arc::clone(&session));

        tokio::spawn(monitor(
            Arc::downgrade(self),
            Arc::clone(&session),
            transcoding.events,
        ));

        // Invalidation or shutdown arrived before the session was visible to them
        if guard.is_cancelled() || *self.shutdown_tx.borrow() {
            session.end(SessionEnd::Invalidated);
        }

        let mut end_rx = session.subscribe_end();
        let readiness = await_manifest(
            &manifest_path,
            self.config.startup_timeout,
            self.config.poll_interval,
            &mut end_rx,
        )
        .await;

        let failure = match readiness {
            Readiness::Ready => {
                if session.mark_ready(self.config.idle_timeout) {
                    self.reaper_wake.notify_one();
                    info!(
                        "Stream {} ready at {}",
                        stream_id,
                        manifest_path.display()
                    );
                    return Ok(session);
                }
                StreamError::Invalidated(stream_id.to_string())
            }
            Readiness::TimedOut => StreamError::StartupTimeout {
                stream_id: stream_id.to_string(),
                waited: self.config.startup_timeout,
            },
            Readiness::Aborted(SessionEnd::Failed(reason)) => StreamError::ProcessFailure {
                stream_id: stream_id.to_string(),
                reason,
            },
            Readiness::Aborted(SessionEnd::Ended) => StreamError::ProcessFailure {
                stream_id: stream_id.to_string(),
                reason: "transcoder exited before producing a manifest".to_string(),
            },
            Readiness::Aborted(SessionEnd::Invalidated) => {
                StreamError::Invalidated(stream_id.to_string())
            }
        };

        warn!("Cold start for stream {} failed: {}", stream_id, failure);
        session.mark_terminating();
        guard.take();
        dispose(&session).await;

        Err(failure)
    }

    /// The single teardown path shared by invalidation, expiry, process death and shutdown.
    /// Returns whether a session was removed.
    async fn teardown(&self, stream_id: &str, reason: Teardown) -> bool {
        let removed = {
            let mut guard = self.store.lock(stream_id).await;

            match guard.current() {
                Some(session) if reason.applies_to(&session) => {
                    info!(
                        "Tearing down stream {} generation {} ({})",
                        stream_id, session.generation, reason
                    );
                    // Readers must see Terminating before the entry disappears
                    session.mark_terminating();
                    guard.take();
                    dispose(&session).await;
                    true
                }
                Some(_) => false,
                None => {
                    if matches!(reason, Teardown::Invalidated) {
                        // Leftovers of a crashed process or an earlier failed removal
                        remove_output_dir(&self.output_dir(stream_id)).await;
                    }
                    false
                }
            }
        };

        self.store.prune(stream_id);
        removed
    }
}

/// Stop the process and delete the artifacts of a session already removed from the store
async fn dispose(session: &Session) {
    session.end(SessionEnd::Invalidated);
    session.stop_process();
    remove_output_dir(&session.output_dir).await;
}

/// Relay transcoder events; death of the process purges its session
async fn monitor(
    inner: Weak<Inner>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<TranscodeEvent>,
) {
    while let Some(event) = events.recv().await {
        let cause = match event {
            TranscodeEvent::Started { pid, command } => {
                debug!(
                    "Transcoder for stream {} running (pid {:?}): {}",
                    session.stream_id, pid, command
                );
                continue;
            }
            TranscodeEvent::Errored(reason) => {
                error!("Transcoder for stream {} errored: {}", session.stream_id, reason);
                SessionEnd::Failed(reason)
            }
            TranscodeEvent::Ended => {
                info!("Transcoder for stream {} ended", session.stream_id);
                SessionEnd::Ended
            }
        };

        session.end(cause);
        if let Some(inner) = inner.upgrade() {
            inner
                .teardown(&session.stream_id, Teardown::ProcessExit(session.generation))
                .await;
        }
        return;
    }
}

/// Tear down sessions whose inactivity deadline passed. Sleeps until the earliest deadline,
/// a newly armed session, or `sweep_interval`, whichever comes first.
async fn reap(inner: Weak<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let now = Instant::now();
        let mut next_wake = now
            .checked_add(inner.config.sweep_interval)
            .unwrap_or_else(|| now + MAX_REAPER_NAP);

        for session in inner.store.all() {
            if session.state() != SessionState::Ready {
                continue;
            }
            if session.is_expired(now) {
                info!("Cleaning up stream {} after inactivity", session.stream_id);
                // A cold start holding this id's gate must not delay other streams
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner
                        .teardown(&session.stream_id, Teardown::Expired(session.generation))
                        .await;
                });
            } else if let Some(deadline) = session.deadline() {
                next_wake = next_wake.min(deadline);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(next_wake)) => {}
            _ = inner.reaper_wake.notified() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    debug!("Reaper stopped");
}

async fn manifest_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn prepare_output_dir(dir: &Path) -> Result<()> {
    // Tolerate partial contents left by a crash or a failed teardown
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Cleared leftover output in {}", dir.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not clear {}: {}", dir.display(), e),
    }

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))
}

/// Best-effort recursive removal; failures are logged, never returned
async fn remove_output_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

/// Map a stream id onto a single safe path component
pub fn sanitize_stream_id(stream_id: &str) -> String {
    let sanitized: String = stream_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::config::{HlsConfig, TranscoderConfig};
    use crate::transcode::{FfmpegTranscoder, TranscodeHandle};
    use chrono::Utc;
    use tempfile::TempDir;

    async fn idle_manager(root: &Path) -> SessionManager {
        let config = SessionConfig {
            output_root: root.to_path_buf(),
            sweep_interval: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let transcoder = FfmpegTranscoder::new(&TranscoderConfig::default(), &HlsConfig::default());
        SessionManager::start(Arc::new(MemoryCatalog::new()), Arc::new(transcoder), config)
            .await
            .unwrap()
    }

    /// Publish a Ready session for `id` that expires after `idle`
    async fn publish_ready(manager: &SessionManager, id: &str, generation: u64, idle: Duration) {
        let metadata = StreamMetadata {
            id: id.to_string(),
            name: id.to_string(),
            slug: id.to_string(),
            video_url: "v".to_string(),
            radio_url: "r".to_string(),
            created_at: Utc::now(),
        };
        let output_dir = manager.output_dir(id);
        let manifest_path = output_dir.join("index.m3u8");
        let (handle, _) = TranscodeHandle::new();
        let session = Session::new(&metadata, generation, output_dir, manifest_path, handle);
        session.mark_ready(idle);

        manager.inner.store.lock(id).await.insert(Arc::new(session));
        manager.inner.reaper_wake.notify_one();
    }

    #[tokio::test]
    async fn test_held_gate_does_not_delay_other_expiries() {
        let dir = TempDir::new().unwrap();
        let manager = idle_manager(dir.path()).await;

        publish_ready(&manager, "a", 1, Duration::from_millis(50)).await;
        publish_ready(&manager, "b", 2, Duration::from_millis(50)).await;

        // Stands in for a cold start of "a" that is still waiting for its manifest
        let held = manager.inner.store.lock("a").await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(manager.session("b").is_none(), "b should expire while a is busy");
        assert!(manager.session("a").is_some());

        drop(held);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(manager.session("a").is_none());

        manager.shutdown().await;
    }

    #[test]
    fn test_sanitize_keeps_uuid() {
        let id = "0b6f1f3e-52c4-4d2a-9a53-2f3c1b8e7d10";
        assert_eq!(sanitize_stream_id(id), id);
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_stream_id("../etc"), "___etc");
        assert_eq!(sanitize_stream_id("a/b"), "a_b");
        assert_eq!(sanitize_stream_id(""), "_");
    }
}
