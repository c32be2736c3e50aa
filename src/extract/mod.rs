//! Scroll-paginate-extract engine.
//!
//! Given a session positioned at a search results page, performs scroll
//! pagination, extracts structured records through ordered selector
//! fallback chains, and deduplicates against the running index. A fresh
//! call re-scans from the top of the result page, so extraction is
//! restartable.

mod dedup;
mod selectors;

pub use dedup::{DedupIndex, FingerprintPolicy};
pub use selectors::SelectorChain;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chromiumoxide::Element;
use tracing::{debug, warn};

use crate::models::{Media, MediaAttachment, PostRecord, SearchQuery, UNKNOWN_AUTHOR, UNKNOWN_HANDLE};
use crate::session::SessionLease;

use selectors::{
    AUTHOR_HANDLE_LINKS, POST_AUTHOR, POST_CONTAINERS, POST_EMBEDS, POST_IMAGES, POST_TEXT,
    POST_TIMESTAMPS, POST_VIDEOS,
};

/// Raw field values scraped from one post container, before validation and
/// fallback substitution.
#[derive(Debug, Clone, Default)]
pub struct RawPost {
    pub author: Option<String>,
    pub handle: Option<String>,
    pub text: Option<String>,
    /// Source timestamp as found on the page (RFC 3339 when present).
    pub timestamp: Option<String>,
    pub media: Media,
}

/// One search's result page, as the engine sees it. The live
/// implementation binds the selector chains to the shared browser page;
/// tests script the scan results.
#[async_trait]
pub trait SearchSurface {
    /// Navigate to the search destination.
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Collect raw posts currently rendered. A failure listing containers
    /// is reported as an error; the engine treats it as an empty pass.
    async fn scan(&mut self) -> Result<Vec<RawPost>>;

    /// Trigger further content loading (scroll-to-bottom equivalent).
    async fn load_more(&mut self) -> Result<()>;
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    /// Upper bound on scroll passes per search.
    pub max_passes: usize,
    /// Minimum accepted text length, in characters.
    pub min_text_len: usize,
    /// Settle interval after each scroll.
    pub settle: Duration,
    pub fingerprint: FingerprintPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://twitter.com".to_string(),
            max_passes: 10,
            min_text_len: 10,
            settle: Duration::from_secs(3),
            fingerprint: FingerprintPolicy::default(),
        }
    }
}

/// The scroll-paginate-extract-dedup loop.
pub struct ExtractionEngine {
    config: EngineConfig,
}

impl ExtractionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run one search to completion: navigate, then scroll-and-extract
    /// until a pass yields nothing new or the pass budget is spent.
    /// Returns only records not already present in the dedup index for
    /// this keyword.
    pub async fn extract<S: SearchSurface + ?Sized>(
        &self,
        surface: &mut S,
        query: &SearchQuery,
        dedup: &DedupIndex,
    ) -> Result<Vec<PostRecord>> {
        let url = query.search_url(&self.config.base_url);
        surface.open(&url).await?;
        tokio::time::sleep(self.config.settle).await;

        let mut accepted = Vec::new();

        for pass in 1..=self.config.max_passes {
            let raw_posts = match surface.scan().await {
                Ok(posts) => posts,
                Err(e) => {
                    // Counts as an empty pass, which also terminates below.
                    warn!("Container scan failed on pass {}: {}", pass, e);
                    Vec::new()
                }
            };

            let mut new_this_pass = 0usize;
            for raw in raw_posts {
                let Some(record) = self.finalize(raw) else {
                    continue;
                };
                let fingerprint = self.config.fingerprint.fingerprint(&record);
                if dedup.insert_if_new(query.keyword(), &fingerprint) {
                    accepted.push(record);
                    new_this_pass += 1;
                }
            }

            debug!(
                "Pass {}/{} for '{}': {} new ({} total)",
                pass,
                self.config.max_passes,
                query.keyword(),
                new_this_pass,
                accepted.len()
            );

            // Stable end-of-stream heuristic
            if new_this_pass == 0 {
                break;
            }

            if pass < self.config.max_passes {
                if let Err(e) = surface.load_more().await {
                    warn!("Scroll failed on pass {}: {}", pass, e);
                }
                tokio::time::sleep(self.config.settle).await;
            }
        }

        Ok(accepted)
    }

    /// Validate a raw post and substitute sentinel fallbacks. Returns
    /// `None` when the text is missing, empty, or below the minimum
    /// length.
    fn finalize(&self, raw: RawPost) -> Option<PostRecord> {
        let text = raw.text.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() || text.chars().count() <= self.config.min_text_len {
            return None;
        }

        let author = raw
            .author
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        let handle = raw
            .handle
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .map(|h| {
                if h.starts_with('@') {
                    h
                } else {
                    format!("@{}", h)
                }
            })
            .unwrap_or_else(|| UNKNOWN_HANDLE.to_string());

        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(PostRecord {
            author,
            handle,
            text,
            timestamp,
            media: raw.media,
        })
    }
}

/// Live surface bound to the exclusive session lease. Holding the lease
/// for the whole extraction call is what serializes navigation across
/// concurrent keyword workers.
pub struct LiveSearchSurface<'a, 'b> {
    lease: &'a SessionLease<'b>,
}

impl<'a, 'b> LiveSearchSurface<'a, 'b> {
    pub fn new(lease: &'a SessionLease<'b>) -> Self {
        Self { lease }
    }

    /// Extract one container's fields. Any per-field failure is swallowed
    /// as "field absent"; this never aborts the pass.
    async fn scrape_container(&self, container: &Element) -> RawPost {
        let mut raw = RawPost::default();

        for selector in POST_TEXT.candidates {
            if let Ok(element) = container.find_element(*selector).await {
                if let Ok(Some(text)) = element.inner_text().await {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        raw.text = Some(text);
                        break;
                    }
                }
            }
        }

        for selector in POST_AUTHOR.candidates {
            if let Ok(element) = container.find_element(*selector).await {
                if let Ok(Some(author)) = element.inner_text().await {
                    let author = author.trim().to_string();
                    if !author.is_empty() {
                        raw.author = Some(author);
                        break;
                    }
                }
            }
        }

        for selector in AUTHOR_HANDLE_LINKS.candidates {
            if let Ok(link) = container.find_element(*selector).await {
                if let Ok(span) = link.find_element("span").await {
                    if let Ok(Some(handle)) = span.inner_text().await {
                        let handle = handle.trim().to_string();
                        if !handle.is_empty() {
                            raw.handle = Some(handle);
                            break;
                        }
                    }
                }
            }
        }

        for selector in POST_TIMESTAMPS.candidates {
            if let Ok(element) = container.find_element(*selector).await {
                if let Ok(Some(datetime)) = element.attribute("datetime").await {
                    raw.timestamp = Some(datetime);
                    break;
                }
            }
        }

        raw.media = self.scrape_media(container).await;
        raw
    }

    /// Media selectors accumulate across all candidates, deduplicating by
    /// URL within the record.
    async fn scrape_media(&self, container: &Element) -> Media {
        let mut media = Media::default();

        for selector in POST_IMAGES.candidates {
            let Ok(elements) = container.find_elements(*selector).await else {
                continue;
            };
            for element in elements {
                let Ok(Some(src)) = element.attribute("src").await else {
                    continue;
                };
                if !src.contains("pbs.twimg.com") {
                    continue;
                }
                if media.images.iter().any(|m| m.url == src) {
                    continue;
                }
                let alt = element.attribute("alt").await.ok().flatten();
                media.images.push(MediaAttachment::image(src, alt));
            }
        }

        for selector in POST_VIDEOS.candidates {
            let Ok(elements) = container.find_elements(*selector).await else {
                continue;
            };
            for element in elements {
                let src = element.attribute("src").await.ok().flatten();
                let poster = element.attribute("poster").await.ok().flatten();
                match (src, poster) {
                    (Some(src), poster) if !src.is_empty() => {
                        if !media.videos.iter().any(|m| m.url == src) {
                            media.videos.push(MediaAttachment::video(src, poster));
                        }
                    }
                    (None, Some(poster)) if !poster.is_empty() => {
                        if !media.videos.iter().any(|m| m.url == poster) {
                            media
                                .videos
                                .push(MediaAttachment::video(poster.clone(), Some(poster)));
                        }
                    }
                    _ => {}
                }
            }
        }

        for selector in POST_EMBEDS.candidates {
            let Ok(elements) = container.find_elements(*selector).await else {
                continue;
            };
            for element in elements {
                let Ok(Some(src)) = element.attribute("src").await else {
                    continue;
                };
                if !media.videos.iter().any(|m| m.url == src) {
                    media.videos.push(MediaAttachment::embed(src));
                }
            }
        }

        media
    }
}

#[async_trait]
impl SearchSurface for LiveSearchSurface<'_, '_> {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.lease.navigate(url).await
    }

    async fn scan(&mut self) -> Result<Vec<RawPost>> {
        let page = self.lease.page();

        // First container selector returning at least one element wins.
        let mut containers = Vec::new();
        for selector in POST_CONTAINERS.candidates {
            match page.find_elements(*selector).await {
                Ok(elements) if !elements.is_empty() => {
                    debug!(
                        "Found {} containers with selector: {}",
                        elements.len(),
                        selector
                    );
                    containers = elements;
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Container selector {} failed: {}", selector, e);
                    continue;
                }
            }
        }

        let mut posts = Vec::with_capacity(containers.len());
        for container in &containers {
            posts.push(self.scrape_container(container).await);
        }
        Ok(posts)
    }

    async fn load_more(&mut self) -> Result<()> {
        self.lease
            .page()
            .evaluate("window.scrollTo(0, document.body.scrollHeight);")
            .await
            .map_err(|e| anyhow::anyhow!("scroll failed: {}", e))?;
        Ok(())
    }
}
