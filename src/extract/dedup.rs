//! Duplicate suppression across harvest passes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::PostRecord;

/// Which record fields make up a dedup fingerprint.
///
/// Both variants occur in deployed harvesters; neither is canonical, so the
/// composition is a configuration choice rather than a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// text | author | handle | time
    #[default]
    Full,
    /// Body text alone.
    TextOnly,
}

impl FingerprintPolicy {
    pub fn fingerprint(&self, record: &PostRecord) -> String {
        match self {
            Self::Full => format!(
                "{} | {} | {} | {}",
                record.text,
                record.author,
                record.handle,
                record.timestamp.to_rfc3339()
            ),
            Self::TextOnly => record.text.clone(),
        }
    }
}

/// Per-keyword set of seen record fingerprints.
///
/// A fingerprint, once inserted, is never removed within a process
/// lifetime. State is in-memory by default; pass a snapshot path to carry
/// it across restarts.
pub struct DedupIndex {
    seen: Mutex<HashMap<String, HashSet<String>>>,
    snapshot_path: Option<PathBuf>,
}

impl DedupIndex {
    /// In-memory index; restarts may re-emit previously seen records.
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Index backed by a JSON snapshot file, loaded now and rewritten on
    /// [`DedupIndex::save`].
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read dedup snapshot {:?}", path))?;
            let loaded: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse dedup snapshot {:?}", path))?;
            for (keyword, fingerprints) in loaded {
                seen.insert(keyword, fingerprints.into_iter().collect());
            }
            info!(
                "Loaded dedup snapshot from {:?} ({} keywords)",
                path,
                seen.len()
            );
        }

        Ok(Self {
            seen: Mutex::new(seen),
            snapshot_path: Some(path),
        })
    }

    /// Insert a fingerprint for a keyword. Returns `true` when it was not
    /// seen before (i.e. the record should be emitted).
    pub fn insert_if_new(&self, keyword: &str, fingerprint: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedup index lock poisoned");
        seen.entry(keyword.to_string())
            .or_default()
            .insert(fingerprint.to_string())
    }

    /// Number of fingerprints recorded for a keyword.
    pub fn seen_count(&self, keyword: &str) -> usize {
        let seen = self.seen.lock().expect("dedup index lock poisoned");
        seen.get(keyword).map(|s| s.len()).unwrap_or(0)
    }

    /// Rewrite the snapshot file. No-op without a configured path.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot: BTreeMap<String, Vec<String>> = {
            let seen = self.seen.lock().expect("dedup index lock poisoned");
            seen.iter()
                .map(|(k, v)| {
                    let mut fingerprints: Vec<String> = v.iter().cloned().collect();
                    fingerprints.sort();
                    (k.clone(), fingerprints)
                })
                .collect()
        };

        let json = serde_json::to_string(&snapshot)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write dedup snapshot {:?}", path))?;
        Ok(())
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Media;
    use chrono::{TimeZone, Utc};

    fn record(text: &str, author: &str) -> PostRecord {
        PostRecord {
            author: author.to_string(),
            handle: "@someone".to_string(),
            text: text.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 13, 5, 36, 16).unwrap(),
            media: Media::default(),
        }
    }

    #[test]
    fn first_insert_is_new_second_is_not() {
        let index = DedupIndex::new();
        assert!(index.insert_if_new("rain", "fp-1"));
        assert!(!index.insert_if_new("rain", "fp-1"));
        assert_eq!(index.seen_count("rain"), 1);
    }

    #[test]
    fn keywords_are_independent() {
        let index = DedupIndex::new();
        assert!(index.insert_if_new("rain", "fp-1"));
        assert!(index.insert_if_new("flood", "fp-1"));
    }

    #[test]
    fn full_policy_distinguishes_same_text_by_author() {
        let policy = FingerprintPolicy::Full;
        let a = policy.fingerprint(&record("same words", "alice"));
        let b = policy.fingerprint(&record("same words", "bob"));
        assert_ne!(a, b);
    }

    #[test]
    fn text_only_policy_collapses_same_text() {
        let policy = FingerprintPolicy::TextOnly;
        let a = policy.fingerprint(&record("same words", "alice"));
        let b = policy.fingerprint(&record("same words", "bob"));
        assert_eq!(a, b);
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.json");

        let index = DedupIndex::with_snapshot(&path).unwrap();
        assert!(index.insert_if_new("rain", "fp-1"));
        assert!(index.insert_if_new("rain", "fp-2"));
        index.save().unwrap();

        let reloaded = DedupIndex::with_snapshot(&path).unwrap();
        assert!(!reloaded.insert_if_new("rain", "fp-1"));
        assert!(reloaded.insert_if_new("rain", "fp-3"));
    }

    #[test]
    fn save_without_path_is_a_noop() {
        let index = DedupIndex::new();
        index.insert_if_new("rain", "fp-1");
        index.save().unwrap();
    }
}
