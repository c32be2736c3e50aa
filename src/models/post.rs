//! Harvested post records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel author display name when extraction finds none.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Sentinel author handle when extraction finds none.
pub const UNKNOWN_HANDLE: &str = "@unknown";

/// Kind of media attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    /// Embedded third-party player frame (youtube, vimeo, twitch).
    Embed,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Embed => "embed",
        }
    }
}

/// One media attachment extracted from a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    pub kind: MediaKind,
    /// Alt text for images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Poster frame URL for videos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

impl MediaAttachment {
    pub fn image(url: impl Into<String>, alt: Option<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
            alt,
            poster: None,
        }
    }

    pub fn video(url: impl Into<String>, poster: Option<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            alt: None,
            poster,
        }
    }

    pub fn embed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Embed,
            alt: None,
            poster: None,
        }
    }
}

/// Media collected from one post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Media {
    pub images: Vec<MediaAttachment>,
    pub videos: Vec<MediaAttachment>,
}

impl Media {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }
}

/// One harvested item. Immutable once constructed; written once, never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    /// Author display name, `UNKNOWN_AUTHOR` when extraction found none.
    pub author: String,
    /// Author handle including the `@` marker, `UNKNOWN_HANDLE` fallback.
    pub handle: String,
    pub text: String,
    /// Source timestamp, or harvest time when the source provided none.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub media: Media,
}

impl PostRecord {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_strings() {
        assert_eq!(MediaKind::Image.as_str(), "image");
        assert_eq!(MediaKind::Video.as_str(), "video");
        assert_eq!(MediaKind::Embed.as_str(), "embed");
    }

    #[test]
    fn empty_media_is_empty() {
        let media = Media::default();
        assert!(media.is_empty());

        let media = Media {
            images: vec![MediaAttachment::image("https://pbs.example/img.jpg", None)],
            videos: Vec::new(),
        };
        assert!(!media.is_empty());
    }
}
