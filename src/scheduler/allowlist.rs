//! Keyword allow-list.
//!
//! The list file is maintained by external tooling; this side only reads
//! it. Newline-delimited keywords, `#`-prefixed comment lines, blanks
//! ignored. An empty set means every keyword is permitted - that is a
//! deliberate contract, not an accident.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

/// Set of permitted keywords.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    keywords: HashSet<String>,
}

impl AllowList {
    /// The empty list: every keyword permitted.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Read the allow-list file. A missing file yields the unrestricted
    /// list; an unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::unrestricted());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read allow-list {:?}", path))?;

        let keywords = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        Ok(Self { keywords })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Empty set permits everything.
    pub fn permits(&self, keyword: &str) -> bool {
        self.keywords.is_empty() || self.keywords.contains(keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_permits_everything() {
        let list = AllowList::unrestricted();
        assert!(list.permits("anything"));
        assert!(list.is_unrestricted());
    }

    #[test]
    fn populated_list_gates() {
        let list = AllowList::from_keywords(["alpha", "beta"]);
        assert!(list.permits("alpha"));
        assert!(list.permits("beta"));
        assert!(!list.permits("gamma"));
    }

    #[test]
    fn file_parsing_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper_keywords.txt");
        std::fs::write(
            &path,
            "# Currently active keywords:\n\nmohan yadav\n  flood relief  \n# disabled keyword\n",
        )
        .unwrap();

        let list = AllowList::load(&path).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.permits("mohan yadav"));
        assert!(list.permits("flood relief"));
        assert!(!list.permits("disabled keyword"));
    }

    #[test]
    fn missing_file_is_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        let list = AllowList::load(&dir.path().join("absent.txt")).unwrap();
        assert!(list.is_unrestricted());
    }

    #[test]
    fn comment_only_file_is_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper_keywords.txt");
        std::fs::write(&path, "# No active keywords - scraper will be stopped\n").unwrap();

        let list = AllowList::load(&path).unwrap();
        assert!(list.is_unrestricted());
    }
}
