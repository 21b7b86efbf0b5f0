// Shared fixtures for session and HTTP integration tests
//
// `FakeTranscoder` stands in for ffmpeg: it writes a manifest (and one segment) into the
// requested output directory after a delay, or misbehaves on demand.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_mixer::{
    MemoryCatalog, NewStream, SessionConfig, SessionManager, StreamCatalog, StreamMetadata,
    TranscodeEvent, TranscodeHandle, TranscodeRequest, Transcoder, Transcoding,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write the manifest after the delay
    Ready(Duration),
    /// Start fine but never produce a manifest
    NeverReady,
    /// Report an error after the delay without producing a manifest
    FailAfter(Duration, String),
    /// Refuse to start at all
    SpawnError,
}

struct Started {
    request: TranscodeRequest,
    handle: TranscodeHandle,
    events: mpsc::Sender<TranscodeEvent>,
}

pub struct FakeTranscoder {
    behavior: Mutex<Behavior>,
    /// How long `start` itself takes before returning
    start_delay: Mutex<Duration>,
    starts: AtomicUsize,
    started: Mutex<HashMap<String, Vec<Started>>>,
}

impl FakeTranscoder {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            start_delay: Mutex::new(Duration::ZERO),
            starts: AtomicUsize::new(0),
            started: Mutex::new(HashMap::new()),
        })
    }

    pub fn ready_after(delay: Duration) -> Arc<Self> {
        Self::new(Behavior::Ready(delay))
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn start_count_for(&self, stream_id: &str) -> usize {
        self.started
            .lock()
            .unwrap()
            .get(stream_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn last_request(&self, stream_id: &str) -> Option<TranscodeRequest> {
        self.started
            .lock()
            .unwrap()
            .get(stream_id)
            .and_then(|s| s.last())
            .map(|s| s.request.clone())
    }

    /// Whether every process started for `stream_id` has been asked to stop
    pub fn all_stopped(&self, stream_id: &str) -> bool {
        self.started
            .lock()
            .unwrap()
            .get(stream_id)
            .map(|s| s.iter().all(|started| started.handle.is_stopped()))
            .unwrap_or(true)
    }

    /// Deliver `event` as if the latest process for `stream_id` produced it
    pub async fn emit(&self, stream_id: &str, event: TranscodeEvent) {
        let events = self
            .started
            .lock()
            .unwrap()
            .get(stream_id)
            .and_then(|s| s.last())
            .map(|s| s.events.clone())
            .expect("no process started for stream");
        events.send(event).await.expect("event receiver dropped");
    }
}

async fn write_output(request: &TranscodeRequest) {
    let manifest = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:6.0,\nindex1.ts\n";
    // The directory may already be gone if the session was torn down meanwhile
    let _ = tokio::fs::write(request.output_dir.join("index1.ts"), b"segment").await;
    let _ = tokio::fs::write(&request.manifest_path, manifest).await;
}

#[async_trait::async_trait]
impl Transcoder for FakeTranscoder {
    async fn start(&self, request: TranscodeRequest) -> Result<Transcoding> {
        let start_delay = *self.start_delay.lock().unwrap();
        if !start_delay.is_zero() {
            tokio::time::sleep(start_delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        if let Behavior::SpawnError = behavior {
            bail!("fake transcoder refused to start");
        }

        self.starts.fetch_add(1, Ordering::SeqCst);

        let (handle, mut stop_rx) = TranscodeHandle::new();
        let (event_tx, event_rx) = mpsc::channel(8);
        let _ = event_tx.try_send(TranscodeEvent::Started {
            pid: None,
            command: "fake".to_string(),
        });

        self.started
            .lock()
            .unwrap()
            .entry(request.stream_id.clone())
            .or_default()
            .push(Started {
                request: request.clone(),
                handle: handle.clone(),
                events: event_tx.clone(),
            });

        tokio::spawn(async move {
            let work = async {
                match behavior {
                    Behavior::Ready(delay) => {
                        tokio::time::sleep(delay).await;
                        write_output(&request).await;
                    }
                    Behavior::FailAfter(delay, reason) => {
                        tokio::time::sleep(delay).await;
                        let _ = event_tx.send(TranscodeEvent::Errored(reason)).await;
                    }
                    Behavior::NeverReady | Behavior::SpawnError => {}
                }
            };
            tokio::select! {
                _ = work => {}
                _ = async {
                    let _ = stop_rx.wait_for(|stopped| *stopped).await;
                } => {}
            }
        });

        Ok(Transcoding {
            handle,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub fn test_config(root: &Path) -> SessionConfig {
    SessionConfig {
        output_root: root.to_path_buf(),
        manifest_name: "index.m3u8".to_string(),
        startup_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(50),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub catalog: Arc<MemoryCatalog>,
    pub transcoder: Arc<FakeTranscoder>,
    pub manager: SessionManager,
}

impl Harness {
    pub async fn new(transcoder: Arc<FakeTranscoder>) -> Self {
        Self::with_config(transcoder, |_| {}).await
    }

    pub async fn with_config(
        transcoder: Arc<FakeTranscoder>,
        tweak: impl FnOnce(&mut SessionConfig),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let catalog = Arc::new(MemoryCatalog::new());
        let manager = SessionManager::start(catalog.clone(), transcoder.clone(), config)
            .await
            .unwrap();

        Self {
            dir,
            catalog,
            transcoder,
            manager,
        }
    }

    pub async fn add_stream(&self, name: &str) -> StreamMetadata {
        self.catalog
            .create_stream(new_stream(name, "v1", "r1"))
            .await
            .unwrap()
    }
}

pub fn new_stream(name: &str, video: &str, radio: &str) -> NewStream {
    NewStream {
        name: name.to_string(),
        video_url: format!("https://video.example/{}/{}.mp4", name, video),
        radio_url: format!("https://radio.example/{}/{}", name, radio),
        slug: None,
    }
}

/// Poll `condition` every 10ms for up to `timeout`
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
