//! Runtime configuration and credential loading.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::extract::FingerprintPolicy;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tweetharvest.toml";

/// Runtime settings.
///
/// Everything here has a serde default so a partial (or absent) config file
/// is valid. Credentials are deliberately NOT part of this struct; they are
/// read from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory output files are written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Allow-list file (newline-delimited keywords, `#` comments).
    /// Absent file or unset path means every keyword is permitted.
    #[serde(default)]
    pub keywords_file: Option<PathBuf>,

    /// Cookie store for session reuse across restarts.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Optional dedup-index snapshot. Unset keeps dedup state in memory
    /// only, matching the original behavior.
    #[serde(default)]
    pub dedup_file: Option<PathBuf>,

    /// Search site base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Command server bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Run the browser headless.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Seconds a keyword worker sleeps between harvest cycles.
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Maximum scroll passes per search.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,

    /// Minimum accepted post text length.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// Seconds to let the result stream settle after each scroll.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// Page load / navigation timeout in seconds.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// Overall login budget in seconds.
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,

    /// Which record fields compose the dedup fingerprint.
    #[serde(default)]
    pub fingerprint: FingerprintPolicy,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_url() -> String {
    "https://twitter.com".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:9999".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_scrape_interval() -> u64 {
    300
}

fn default_max_passes() -> usize {
    10
}

fn default_min_text_len() -> usize {
    10
}

fn default_settle() -> u64 {
    3
}

fn default_page_timeout() -> u64 {
    30
}

fn default_login_timeout() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            keywords_file: None,
            cookies_file: None,
            dedup_file: None,
            base_url: default_base_url(),
            bind: default_bind(),
            headless: default_headless(),
            scrape_interval_secs: default_scrape_interval(),
            max_passes: default_max_passes(),
            min_text_len: default_min_text_len(),
            settle_secs: default_settle(),
            page_timeout_secs: default_page_timeout(),
            login_timeout_secs: default_login_timeout(),
            fingerprint: FingerprintPolicy::default(),
            chrome_args: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, or from `tweetharvest.toml` in
    /// the working directory when present. Missing files yield defaults;
    /// unparseable files are an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(settings)
    }
}

/// Login secret material, sourced from the environment only.
///
/// Absence is a hard failure for the automated login flow; the interactive
/// flow tolerates it.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub const USERNAME_VAR: &'static str = "TWITTER_USERNAME";
    pub const PASSWORD_VAR: &'static str = "TWITTER_PASSWORD";

    /// Read the credential pair from the environment. Returns `None` when
    /// either half is unset or empty.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(Self::USERNAME_VAR).ok()?;
        let password = std::env::var(Self::PASSWORD_VAR).ok()?;
        if username.trim().is_empty() || password.trim().is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

// Credentials must never leak into logs or error chains.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.base_url, "https://twitter.com");
        assert_eq!(settings.bind, "127.0.0.1:9999");
        assert_eq!(settings.scrape_interval_secs, 300);
        assert_eq!(settings.max_passes, 10);
        assert!(settings.headless);
        assert!(settings.keywords_file.is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweetharvest.toml");
        std::fs::write(&path, "bind = \"0.0.0.0:7777\"\nmax_passes = 4\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.bind, "0.0.0.0:7777");
        assert_eq!(settings.max_passes, 4);
        // Untouched fields keep their defaults
        assert_eq!(settings.min_text_len, 10);
        assert_eq!(settings.base_url, "https://twitter.com");
    }

    #[test]
    fn missing_default_config_is_ok() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.scrape_interval_secs, 300);
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "bind = [not toml").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "someone".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("someone"));
        assert!(!rendered.contains("hunter2"));
    }
}
