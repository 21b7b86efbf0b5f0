use super::stream::{generate_slug, NewStream, StreamMetadata};
use super::StreamCatalog;
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// In-memory catalog; contents are lost on restart
#[derive(Default)]
pub struct MemoryCatalog {
    streams: RwLock<HashMap<String, StreamMetadata>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StreamCatalog for MemoryCatalog {
    async fn get_stream_by_id(&self, id: &str) -> Result<Option<StreamMetadata>> {
        let streams = self.streams.read().await;
        Ok(streams.get(id).cloned())
    }

    async fn get_stream_by_slug(&self, slug: &str) -> Result<Option<StreamMetadata>> {
        let streams = self.streams.read().await;
        Ok(streams.values().find(|s| s.slug == slug).cloned())
    }

    async fn list_streams(&self) -> Result<Vec<StreamMetadata>> {
        let streams = self.streams.read().await;
        let mut all: Vec<StreamMetadata> = streams.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn create_stream(&self, stream: NewStream) -> Result<StreamMetadata> {
        stream.validate()?;

        let mut streams = self.streams.write().await;

        let slug = match stream.slug {
            Some(slug) => {
                if streams.values().any(|s| s.slug == slug) {
                    bail!("slug {} is already taken", slug);
                }
                slug
            }
            None => generate_slug(&stream.name),
        };

        let metadata = StreamMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            name: stream.name,
            slug,
            video_url: stream.video_url,
            radio_url: stream.radio_url,
            created_at: Utc::now(),
        };

        info!("Created stream {} ({})", metadata.slug, metadata.id);
        streams.insert(metadata.id.clone(), metadata.clone());

        Ok(metadata)
    }

    async fn update_stream(&self, id: &str, stream: NewStream) -> Result<Option<StreamMetadata>> {
        stream.validate()?;

        let mut streams = self.streams.write().await;
        let Some(existing) = streams.get_mut(id) else {
            return Ok(None);
        };

        // The slug is the public address of the stream and never changes
        existing.name = stream.name;
        existing.video_url = stream.video_url;
        existing.radio_url = stream.radio_url;

        Ok(Some(existing.clone()))
    }

    async fn delete_stream(&self, id: &str) -> Result<bool> {
        let mut streams = self.streams.write().await;
        Ok(streams.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_stream(name: &str) -> NewStream {
        NewStream {
            name: name.to_string(),
            video_url: format!("https://video.example/{}.mp4", name),
            radio_url: format!("https://radio.example/{}", name),
            slug: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let catalog = MemoryCatalog::new();
        let created = catalog.create_stream(new_stream("jazz")).await.unwrap();

        let by_id = catalog.get_stream_by_id(&created.id).await.unwrap();
        let by_slug = catalog.get_stream_by_slug(&created.slug).await.unwrap();

        assert_eq!(by_id.as_ref(), Some(&created));
        assert_eq!(by_slug.as_ref(), Some(&created));
    }

    #[tokio::test]
    async fn test_slug_lookup_is_exact() {
        let catalog = MemoryCatalog::new();
        let created = catalog.create_stream(new_stream("jazz")).await.unwrap();

        let prefix = &created.slug[..4];
        assert!(catalog.get_stream_by_slug(prefix).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_explicit_slug_rejected() {
        let catalog = MemoryCatalog::new();
        let mut first = new_stream("a");
        first.slug = Some("fixed".to_string());
        catalog.create_stream(first.clone()).await.unwrap();

        assert!(catalog.create_stream(first).await.is_err());
    }

    #[tokio::test]
    async fn test_update_keeps_slug() {
        let catalog = MemoryCatalog::new();
        let created = catalog.create_stream(new_stream("jazz")).await.unwrap();

        let updated = catalog
            .update_stream(&created.id, new_stream("blues"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.slug, created.slug);
        assert_eq!(updated.name, "blues");
        assert_eq!(updated.video_url, "https://video.example/blues.mp4");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let catalog = MemoryCatalog::new();

        assert!(catalog.update_stream("nope", new_stream("x")).await.unwrap().is_none());
        assert!(!catalog.delete_stream("nope").await.unwrap());
    }
}
