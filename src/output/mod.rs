//! Append-only record files.
//!
//! One file per keyword (or per one-shot invocation), records delimited by
//! `## Tweet <n>` headers. The sink recovers its sequence counter from the
//! markers already present, so reopening a file continues numbering
//! instead of restarting at 1.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::models::PostRecord;

/// Marker opening each record block. Sequence recovery counts these.
const RECORD_MARKER: &str = "## Tweet ";

/// Replace filesystem-hostile characters in a keyword.
fn sanitize(keyword: &str) -> String {
    keyword
        .trim()
        .replace([' ', '/'], "_")
        .replace(['\\', ':', '*', '?', '"', '<', '>', '|'], "")
}

/// Stable per-keyword output file name, so restarts keep appending to the
/// same file.
pub fn keyword_file_name(keyword: &str) -> String {
    format!("tweets_output_{}.md", sanitize(keyword))
}

/// Unique per-invocation file name: sanitized keywords, timestamp, and a
/// short content hash to keep concurrent invocations apart.
pub fn unique_file_name(keywords: &[String], handles: &[String]) -> String {
    let now = Utc::now();

    let mut hasher = Sha256::new();
    hasher.update(keywords.join(","));
    hasher.update("_");
    hasher.update(handles.join(","));
    hasher.update("_");
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());

    let clean_keywords: Vec<String> = keywords.iter().map(|k| sanitize(k)).collect();

    format!(
        "tweets_output_{}_{}_{}.md",
        clean_keywords.join("_"),
        now.format("%Y%m%d_%H%M%S"),
        &digest[..8]
    )
}

/// Append-only writer with monotonic sequence numbers across restarts.
pub struct OutputSink {
    path: PathBuf,
    next_seq: u64,
}

impl OutputSink {
    /// Open (or create) an output file, recovering the next sequence
    /// number by counting existing record markers.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let existing = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read output file {:?}", path))?;
            content
                .lines()
                .filter(|line| line.starts_with(RECORD_MARKER))
                .count() as u64
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            0
        };

        if existing > 0 {
            debug!(
                "Resuming output file {:?} at sequence {}",
                path,
                existing + 1
            );
        }

        Ok(Self {
            path,
            next_seq: existing + 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, as reported in scrape responses.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Append records as self-describing blocks. Returns the count
    /// written. Never rewrites or renumbers prior records.
    pub fn append(
        &mut self,
        records: &[PostRecord],
        keyword: &str,
        handle: Option<&str>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open output file {:?}", self.path))?;

        for record in records {
            let mut block = String::new();
            block.push_str(&format!("{}{}\n", RECORD_MARKER, self.next_seq));
            block.push_str(&format!("**Author:** {}\n", record.author));
            block.push_str(&format!("**Time:** {}\n", record.timestamp.to_rfc3339()));
            block.push_str(&format!("**Text:** {}\n", record.text));
            block.push_str(&format!("**Keyword:** {}\n", keyword));
            if let Some(handle) = handle {
                block.push_str(&format!("**Handle:** {}\n", handle));
            }

            if !record.media.images.is_empty() {
                block.push_str(&format!(
                    "**Images:** {} found\n",
                    record.media.images.len()
                ));
                for (i, image) in record.media.images.iter().enumerate() {
                    block.push_str(&format!("  - Image {}: {}\n", i + 1, image.url));
                }
            }
            if !record.media.videos.is_empty() {
                block.push_str(&format!(
                    "**Videos:** {} found\n",
                    record.media.videos.len()
                ));
                for (i, video) in record.media.videos.iter().enumerate() {
                    block.push_str(&format!(
                        "  - Video {}: {} (type: {})\n",
                        i + 1,
                        video.url,
                        video.kind.as_str()
                    ));
                }
            }

            block.push('\n');
            file.write_all(block.as_bytes())
                .with_context(|| format!("failed to append to {:?}", self.path))?;
            self.next_seq += 1;
        }

        file.flush()?;
        info!(
            "Appended {} records to {}",
            records.len(),
            self.file_name()
        );
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Media, MediaAttachment};
    use chrono::TimeZone;

    fn record(text: &str) -> PostRecord {
        PostRecord {
            author: "Dr Mohan Yadav".to_string(),
            handle: "@drmohanyadav".to_string(),
            text: text.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 13, 5, 36, 16).unwrap(),
            media: Media::default(),
        }
    }

    #[test]
    fn fresh_file_numbers_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets_output_rain.md");

        let mut sink = OutputSink::open(&path).unwrap();
        let records = vec![record("one"), record("two"), record("three")];
        assert_eq!(sink.append(&records, "rain", None).unwrap(), 3);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("## Tweet 1\n"));
        assert!(content.contains("## Tweet 2\n"));
        assert!(content.contains("## Tweet 3\n"));
        assert!(!content.contains("## Tweet 4"));
    }

    #[test]
    fn reopening_continues_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets_output_rain.md");

        {
            let mut sink = OutputSink::open(&path).unwrap();
            sink.append(&[record("one"), record("two"), record("three")], "rain", None)
                .unwrap();
        }

        let mut sink = OutputSink::open(&path).unwrap();
        sink.append(&[record("four"), record("five")], "rain", None)
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        for n in 1..=5 {
            assert!(content.contains(&format!("## Tweet {}\n", n)), "missing {}", n);
        }
        // 1..3 appear exactly once - nothing was renumbered
        assert_eq!(content.matches("## Tweet 1\n").count(), 1);
        assert_eq!(content.matches("## Tweet 3\n").count(), 1);
    }

    #[test]
    fn block_carries_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");

        let mut rec = record("flood waters rising near the bridge");
        rec.media.images.push(MediaAttachment::image(
            "https://pbs.twimg.com/media/abc.jpg",
            None,
        ));
        rec.media
            .videos
            .push(MediaAttachment::embed("https://youtube.com/embed/xyz"));

        let mut sink = OutputSink::open(&path).unwrap();
        sink.append(&[rec], "flood", Some("wmo")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("**Author:** Dr Mohan Yadav\n"));
        assert!(content.contains("**Time:** 2025-03-13T05:36:16+00:00\n"));
        assert!(content.contains("**Text:** flood waters rising near the bridge\n"));
        assert!(content.contains("**Keyword:** flood\n"));
        assert!(content.contains("**Handle:** wmo\n"));
        assert!(content.contains("**Images:** 1 found\n"));
        assert!(content.contains("  - Image 1: https://pbs.twimg.com/media/abc.jpg\n"));
        assert!(content.contains("**Videos:** 1 found\n"));
        assert!(content.contains("  - Video 1: https://youtube.com/embed/xyz (type: embed)\n"));
        // Blank line between records
        assert!(content.ends_with("\n\n"));
    }

    #[test]
    fn global_scrape_omits_handle_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");

        let mut sink = OutputSink::open(&path).unwrap();
        sink.append(&[record("no handle on this one")], "rain", None)
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("**Handle:**"));
    }

    #[test]
    fn empty_append_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");

        let mut sink = OutputSink::open(&path).unwrap();
        assert_eq!(sink.append(&[], "rain", None).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn keyword_file_names_are_path_safe() {
        assert_eq!(
            keyword_file_name("mohan yadav"),
            "tweets_output_mohan_yadav.md"
        );
        assert_eq!(keyword_file_name("a/b"), "tweets_output_a_b.md");
        assert_eq!(keyword_file_name("what?"), "tweets_output_what.md");
    }

    #[test]
    fn unique_file_names_differ_between_calls() {
        let keywords = vec!["rain".to_string()];
        let a = unique_file_name(&keywords, &[]);
        let b = unique_file_name(&keywords, &[]);
        assert!(a.starts_with("tweets_output_rain_"));
        assert!(a.ends_with(".md"));
        assert_ne!(a, b);
    }
}
