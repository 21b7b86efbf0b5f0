use super::{TranscodeEvent, TranscodeHandle, TranscodeRequest, Transcoder, Transcoding};
use crate::config::{HlsConfig, TranscoderConfig};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lines of ffmpeg stderr kept for error diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// Runs `ffmpeg` as a child process, one per session
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    log_level: String,
    hls: HlsConfig,
}

impl FfmpegTranscoder {
    pub fn new(transcoder: &TranscoderConfig, hls: &HlsConfig) -> Self {
        Self {
            ffmpeg_path: transcoder.ffmpeg_path.clone(),
            log_level: transcoder.log_level.clone(),
            hls: hls.clone(),
        }
    }
}

/// Build the ffmpeg argument list for one session
///
/// Video is read from the first input looped forever, audio from the radio source, both at
/// native rate. Video is copied, audio re-encoded to AAC, and the result written as a rolling
/// HLS playlist that deletes old segments and is never marked ended.
pub fn ffmpeg_args(request: &TranscodeRequest, hls: &HlsConfig, log_level: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(40);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-nostdin", "-loglevel", log_level]);

    // Inputs
    push(&["-stream_loop", "-1", "-re", "-i", &request.video_url]);
    push(&["-re", "-i", &request.radio_url]);

    // Mapping and codecs
    push(&["-map", "0:v", "-map", "1:a"]);
    push(&["-c:v", "copy", "-c:a", "aac", "-b:a", &hls.audio_bitrate]);

    // HLS muxer
    push(&[
        "-f",
        "hls",
        "-hls_time",
        &hls.segment_secs.to_string(),
        "-hls_list_size",
        &hls.list_size.to_string(),
        "-hls_flags",
        "delete_segments+append_list+omit_endlist",
        "-start_number",
        &hls.start_number.to_string(),
    ]);

    args.push(request.manifest_path.to_string_lossy().into_owned());
    args
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn start(&self, request: TranscodeRequest) -> Result<Transcoding> {
        let args = ffmpeg_args(&request, &self.hls, &self.log_level);
        let command = format!("{} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.ffmpeg_path))?;

        let pid = child.id();
        info!("ffmpeg started for stream {} (pid {:?})", request.stream_id, pid);
        debug!("ffmpeg command: {}", command);

        let (handle, stop_rx) = TranscodeHandle::new();
        let (event_tx, event_rx) = mpsc::channel(8);

        // Fresh channel, cannot be full
        let _ = event_tx.try_send(TranscodeEvent::Started { pid, command });

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(request.stream_id.clone(), stderr)));

        tokio::spawn(supervise(request.stream_id, child, stderr_task, stop_rx, event_tx));

        Ok(Transcoding {
            handle,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Keep the last few stderr lines of the child
async fn collect_stderr(stream_id: String, stderr: ChildStderr) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("ffmpeg[{}]: {}", stream_id, line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail
}

/// Wait for the child to exit or for a stop request, then report the outcome
async fn supervise(
    stream_id: String,
    mut child: Child,
    stderr_task: Option<JoinHandle<VecDeque<String>>>,
    mut stop_rx: watch::Receiver<bool>,
    events: mpsc::Sender<TranscodeEvent>,
) {
    let exit = tokio::select! {
        status = child.wait() => Some(status),
        // A dropped handle counts as a stop request
        _ = async {
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
        } => None,
    };

    let Some(exit) = exit else {
        info!("Stopping ffmpeg for stream {}", stream_id);
        if let Err(e) = child.start_kill() {
            warn!("Failed to signal ffmpeg for stream {}: {}", stream_id, e);
        }
        if let Err(e) = child.wait().await {
            warn!("Failed to reap ffmpeg for stream {}: {}", stream_id, e);
        }
        if let Some(task) = stderr_task {
            task.abort();
        }
        return;
    };

    let tail = match stderr_task {
        Some(task) => match tokio::time::timeout(Duration::from_secs(1), task).await {
            Ok(Ok(tail)) => tail.into_iter().collect::<Vec<_>>().join("\n"),
            _ => String::new(),
        },
        None => String::new(),
    };

    let event = match exit {
        Ok(status) if status.success() => {
            info!("ffmpeg finished for stream {}", stream_id);
            TranscodeEvent::Ended
        }
        Ok(status) => {
            error!("ffmpeg for stream {} exited with {}: {}", stream_id, status, tail);
            TranscodeEvent::Errored(if tail.is_empty() {
                format!("ffmpeg exited with {}", status)
            } else {
                format!("ffmpeg exited with {}: {}", status, tail)
            })
        }
        Err(e) => {
            error!("Failed to wait on ffmpeg for stream {}: {}", stream_id, e);
            TranscodeEvent::Errored(e.to_string())
        }
    };

    // Receiver gone means nobody cares any more
    let _ = events.send(event).await;
}
