//! Cookie persistence for session reuse across restarts.

use std::path::PathBuf;

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::{Browser, Page};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Cookie as persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Persists and restores authentication cookies as a JSON file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Restore saved cookies into a page. Individual bad entries are
    /// skipped, never failing the whole restore.
    pub async fn restore(&self, page: &Page) -> Result<usize> {
        debug!("Loading cookies from {:?}", self.path);

        let content = std::fs::read_to_string(&self.path)?;
        let cookies: Vec<StoredCookie> = serde_json::from_str(&content)?;

        let mut restored = 0;
        for cookie in cookies {
            if cookie.name.is_empty() || cookie.domain.is_empty() {
                continue;
            }

            let param = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(&cookie.domain)
                .build();

            match param {
                Ok(param) => {
                    if let Err(e) = page.set_cookie(param).await {
                        warn!("Failed to set cookie {}: {}", cookie.name, e);
                    } else {
                        restored += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to build cookie {}: {}", cookie.name, e);
                }
            }
        }

        info!("Restored {} cookies from {:?}", restored, self.path);
        Ok(restored)
    }

    /// Save the browser's current cookies.
    pub async fn save(&self, browser: &Browser) -> Result<()> {
        let cookies = browser.get_cookies().await?;
        let stored: Vec<StoredCookie> = cookies
            .iter()
            .map(|c| StoredCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();

        let json = serde_json::to_string_pretty(&stored)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        info!("Saved {} cookies to {:?}", stored.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_cookie_tolerates_minimal_entries() {
        // Entries written by other tooling may carry only name/value/domain.
        let json = r#"[{"name":"auth_token","value":"abc","domain":".twitter.com"}]"#;
        let cookies: Vec<StoredCookie> = serde_json::from_str(json).unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "auth_token");
        assert!(!cookies[0].secure);
        assert!(cookies[0].path.is_empty());
    }

    #[test]
    fn store_roundtrips_on_disk_format() {
        let cookie = StoredCookie {
            name: "ct0".to_string(),
            value: "token".to_string(),
            domain: ".twitter.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
        };
        let json = serde_json::to_string(&vec![cookie]).unwrap();
        let back: Vec<StoredCookie> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0].value, "token");
        assert!(back[0].http_only);
    }
}
