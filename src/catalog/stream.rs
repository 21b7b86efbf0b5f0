use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logical stream: a looping video source muxed with a radio source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub video_url: String,
    pub radio_url: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating or updating a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStream {
    pub name: String,
    pub video_url: String,
    pub radio_url: String,

    /// Explicit slug; generated from the name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl NewStream {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty()
            || self.video_url.trim().is_empty()
            || self.radio_url.trim().is_empty()
        {
            bail!("name, video_url and radio_url are required");
        }
        Ok(())
    }
}

/// Build a unique slug: the lowercased name with every non `[a-z0-9]` char replaced by `-`,
/// followed by the first 8 hex digits of a random uuid.
pub fn generate_slug(name: &str) -> String {
    let base: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    format!("{}-{}", base, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_replaces_non_alphanumerics() {
        let slug = generate_slug("Chill Beats #1");

        assert!(slug.starts_with("chill-beats--1-"), "got {}", slug);
        assert_eq!(slug.len(), "chill-beats--1-".len() + 8);
    }

    #[test]
    fn test_slugs_are_unique() {
        assert_ne!(generate_slug("radio"), generate_slug("radio"));
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let stream = NewStream {
            name: "x".to_string(),
            video_url: " ".to_string(),
            radio_url: "http://radio".to_string(),
            slug: None,
        };

        assert!(stream.validate().is_err());
    }
}
