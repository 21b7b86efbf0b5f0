use super::session::SessionEnd;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Outcome of waiting for a session's first manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// The session died or was torn down while we were waiting
    Aborted(SessionEnd),
}

/// Wait until `manifest_path` exists, `timeout` elapses, or `end_rx` reports the session dead.
///
/// The file is polled every `poll_interval`; a death notification interrupts the current
/// poll sleep immediately.
pub async fn await_manifest(
    manifest_path: &Path,
    timeout: Duration,
    poll_interval: Duration,
    end_rx: &mut watch::Receiver<Option<SessionEnd>>,
) -> Readiness {
    // `None` when the timeout is too large to represent: wait without bound
    let deadline = Instant::now().checked_add(timeout);

    loop {
        let ended = end_rx.borrow_and_update().clone();
        if let Some(end) = ended {
            return Readiness::Aborted(end);
        }

        if tokio::fs::try_exists(manifest_path).await.unwrap_or(false) {
            return Readiness::Ready;
        }

        let now = Instant::now();
        let nap = match deadline {
            Some(deadline) if now >= deadline => return Readiness::TimedOut,
            Some(deadline) => poll_interval.min(deadline - now),
            None => poll_interval,
        };

        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            changed = end_rx.changed() => {
                // Sender dropped: the session no longer exists
                if changed.is_err() {
                    return Readiness::Aborted(SessionEnd::Invalidated);
                }
            }
        }
    }
}
