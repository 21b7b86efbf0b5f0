//! Transcoding session lifecycle
//!
//! This module provides the `SessionManager` that:
//! - Starts at most one transcoder per stream, on first demand
//! - Waits for the first manifest before answering a viewer
//! - Renews an inactivity deadline on every request and reaps idle sessions
//! - Tears sessions down on invalidation, process death or shutdown

mod config;
mod manager;
mod readiness;
mod session;
mod store;

pub use config::SessionConfig;
pub use manager::{sanitize_stream_id, SessionManager};
pub use readiness::{await_manifest, Readiness};
pub use session::{Session, SessionEnd, SessionInfo, SessionState};
pub use store::{SessionStore, SlotGuard};
