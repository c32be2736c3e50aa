//! Ordered selector-fallback chains.
//!
//! The result page's markup changes attributes frequently; a fixed selector
//! is brittle, an ordered fallback chain degrades gracefully. Chains are
//! data, not control flow - extending one means adding a candidate, not
//! another branch.

/// An ordered list of selector candidates for one extraction target.
#[derive(Debug, Clone, Copy)]
pub struct SelectorChain {
    /// Target name, used in diagnostics.
    pub field: &'static str,
    /// Candidates in priority order.
    pub candidates: &'static [&'static str],
}

impl SelectorChain {
    pub const fn new(field: &'static str, candidates: &'static [&'static str]) -> Self {
        Self { field, candidates }
    }

    /// Evaluate candidates in order; the first one the probe answers for
    /// wins. Returns `None` when the whole chain comes up empty.
    pub fn pick<T>(&self, mut probe: impl FnMut(&'static str) -> Option<T>) -> Option<T> {
        for candidate in self.candidates {
            if let Some(value) = probe(candidate) {
                return Some(value);
            }
        }
        None
    }
}

/// Post container elements on a search results page.
pub const POST_CONTAINERS: SelectorChain = SelectorChain::new(
    "container",
    &[
        "article[data-testid=\"tweet\"]",
        "[data-testid=\"tweet\"]",
        "article[role=\"article\"]",
        "div[data-testid=\"tweet\"]",
        "article",
    ],
);

/// Post body text.
pub const POST_TEXT: SelectorChain = SelectorChain::new(
    "text",
    &[
        "[data-testid=\"tweetText\"]",
        "div[data-testid=\"tweetText\"]",
        "div[lang]",
        "span[lang]",
    ],
);

/// Author display name.
pub const POST_AUTHOR: SelectorChain = SelectorChain::new(
    "author",
    &[
        "div[data-testid=\"User-Name\"] span span",
        "[data-testid=\"User-Name\"] span",
        "a[role=\"link\"] span",
        "div[dir=\"ltr\"] span",
    ],
);

/// Link carrying the author handle.
pub const AUTHOR_HANDLE_LINKS: SelectorChain = SelectorChain::new(
    "handle",
    &[
        "div[data-testid=\"User-Name\"] a[href^=\"/\"]",
        "a[href^=\"/\"]",
    ],
);

/// Post timestamp element.
pub const POST_TIMESTAMPS: SelectorChain = SelectorChain::new("timestamp", &["time"]);

/// Image attachments. Unlike the first-wins chains above, media selectors
/// are accumulated across all candidates with per-URL dedup.
pub const POST_IMAGES: SelectorChain = SelectorChain::new(
    "images",
    &[
        "img[src*=\"pbs.twimg.com\"]",
        "img[data-testid=\"tweetPhoto\"]",
        "div[data-testid=\"tweetPhoto\"] img",
        "img[alt*=\"Image\"]",
        "img[src*=\"media\"]",
    ],
);

/// Video attachments, accumulated like images.
pub const POST_VIDEOS: SelectorChain = SelectorChain::new(
    "videos",
    &[
        "video[src]",
        "video source[src]",
        "div[data-testid=\"videoPlayer\"] video",
        "div[data-testid=\"videoPlayer\"] source",
        "video[poster]",
    ],
);

/// Embedded third-party players, reported as video media.
pub const POST_EMBEDS: SelectorChain = SelectorChain::new(
    "embeds",
    &[
        "iframe[src*=\"youtube\"]",
        "iframe[src*=\"vimeo\"]",
        "iframe[src*=\"twitch\"]",
    ],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_returns_first_match() {
        let chain = SelectorChain::new("test", &["a", "b", "c"]);
        let picked = chain.pick(|sel| if sel == "b" || sel == "c" { Some(sel) } else { None });
        assert_eq!(picked, Some("b"));
    }

    #[test]
    fn pick_respects_priority_order() {
        let chain = SelectorChain::new("test", &["a", "b"]);
        let mut tried = Vec::new();
        let picked = chain.pick(|sel| {
            tried.push(sel);
            Some(sel)
        });
        assert_eq!(picked, Some("a"));
        assert_eq!(tried, vec!["a"]);
    }

    #[test]
    fn pick_exhausts_to_none() {
        let chain = SelectorChain::new("test", &["a", "b"]);
        let picked = chain.pick(|_| None::<()>);
        assert!(picked.is_none());
    }

    #[test]
    fn container_chain_prefers_testid() {
        assert_eq!(
            POST_CONTAINERS.candidates[0],
            "article[data-testid=\"tweet\"]"
        );
        // Bare article is the last resort
        assert_eq!(
            *POST_CONTAINERS.candidates.last().unwrap(),
            "article"
        );
    }
}
