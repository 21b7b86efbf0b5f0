pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod shutdown;
pub mod transcode;

pub use catalog::{MemoryCatalog, NewStream, StreamCatalog, StreamMetadata};
pub use config::Config;
pub use error::{StreamError, StreamResult};
pub use http::{create_router, AppState};
pub use shutdown::shutdown_signal;
pub use session::{SessionConfig, SessionInfo, SessionManager, SessionState};
pub use transcode::{FfmpegTranscoder, TranscodeEvent, TranscodeHandle, TranscodeRequest, Transcoder, Transcoding};
