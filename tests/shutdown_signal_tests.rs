// Process signal handling
//
// Kept in its own test binary: the signal is delivered to the whole process.

#![cfg(unix)]

use std::time::Duration;
use stream_mixer::shutdown_signal;

#[tokio::test]
async fn test_sigterm_requests_shutdown() {
    let waiting = tokio::spawn(shutdown_signal());

    // Let the handlers install before the signal is sent
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    let status = tokio::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .await
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("SIGTERM did not resolve the shutdown signal")
        .unwrap();
}
