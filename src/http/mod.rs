//! HTTP API server
//!
//! This module exposes the sessions and the stream catalog over HTTP:
//! - GET /stream/:slug/index.m3u8 - Live manifest, starting the transcoder on demand
//! - GET /stream/:slug/:segment - Media segment of a live stream
//! - GET|POST /api/streams - List or create streams
//! - GET|PUT|DELETE /api/streams/:id - Read, update or delete a stream
//! - GET /api/sessions - Live transcoding sessions
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::ErrorResponse;
pub use routes::create_router;
pub use state::AppState;
