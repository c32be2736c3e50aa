//! Search query construction.

use anyhow::{ensure, Result};

/// One harvesting unit: a keyword, optionally scoped to a single handle.
///
/// The handle is held as a bare identifier internally; the `from:` marker is
/// re-added only when the query string is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    keyword: String,
    handle: Option<String>,
}

impl SearchQuery {
    pub fn new(keyword: &str, handle: Option<&str>) -> Result<Self> {
        let keyword = keyword.trim();
        ensure!(!keyword.is_empty(), "search keyword must be non-empty");

        let handle = handle
            .map(|h| h.trim().trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty());

        Ok(Self {
            keyword: keyword.to_string(),
            handle,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Bare handle without the leading marker, if this query is scoped.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Raw query string sent to the search endpoint.
    fn query_string(&self) -> String {
        match &self.handle {
            Some(handle) => format!("from:{} {}", handle, self.keyword),
            None => self.keyword.clone(),
        }
    }

    /// Full search URL, always requesting the recency-ordered stream.
    pub fn search_url(&self, base_url: &str) -> String {
        format!(
            "{}/search?q={}&src=typed_query&f=live",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&self.query_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keyword_is_rejected() {
        assert!(SearchQuery::new("", None).is_err());
        assert!(SearchQuery::new("   ", None).is_err());
    }

    #[test]
    fn handle_marker_is_stripped_internally() {
        let query = SearchQuery::new("flood relief", Some("@someorg")).unwrap();
        assert_eq!(query.handle(), Some("someorg"));
    }

    #[test]
    fn blank_handle_means_global() {
        let query = SearchQuery::new("rain", Some("  ")).unwrap();
        assert_eq!(query.handle(), None);
    }

    #[test]
    fn global_search_url() {
        let query = SearchQuery::new("mohan yadav", None).unwrap();
        assert_eq!(
            query.search_url("https://twitter.com"),
            "https://twitter.com/search?q=mohan%20yadav&src=typed_query&f=live"
        );
    }

    #[test]
    fn handle_scoped_search_url_readds_marker() {
        let query = SearchQuery::new("launch", Some("@OpenAI")).unwrap();
        assert_eq!(
            query.search_url("https://twitter.com/"),
            "https://twitter.com/search?q=from%3AOpenAI%20launch&src=typed_query&f=live"
        );
    }
}
