//! Stream metadata catalog
//!
//! The lifecycle manager only ever reads from the catalog. Mutations go through the HTTP layer,
//! which invalidates the live session for a stream before acknowledging the change.

mod memory;
mod stream;

pub use memory::MemoryCatalog;
pub use stream::{generate_slug, NewStream, StreamMetadata};

use anyhow::Result;

/// Read/write access to stream metadata
#[async_trait::async_trait]
pub trait StreamCatalog: Send + Sync {
    /// Look up a stream by id; `None` when it does not exist
    async fn get_stream_by_id(&self, id: &str) -> Result<Option<StreamMetadata>>;

    /// Look up a stream by exact slug
    async fn get_stream_by_slug(&self, slug: &str) -> Result<Option<StreamMetadata>>;

    /// All streams, newest first
    async fn list_streams(&self) -> Result<Vec<StreamMetadata>>;

    async fn create_stream(&self, stream: NewStream) -> Result<StreamMetadata>;

    /// Replace name and sources of an existing stream; `None` when it does not exist
    async fn update_stream(&self, id: &str, stream: NewStream) -> Result<Option<StreamMetadata>>;

    /// Remove a stream; returns whether it existed
    async fn delete_stream(&self, id: &str) -> Result<bool>;
}
