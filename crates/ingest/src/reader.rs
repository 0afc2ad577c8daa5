//! Transcript enumeration and line-level parsing.
//!
//! Claude Code writes one JSONL file per session under the projects root.
//! The reader walks `<root>/**/*.jsonl` in a deterministic order and streams
//! each file line by line; a malformed line is surfaced to the caller (who
//! logs and counts it) without aborting the file, and an unopenable file is
//! skipped the same way. Files are never mutated.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

/// One transcript line, as serialised by the chat client. Unknown fields are
/// tolerated and ignored; everything the normaliser needs is optional here so
/// extraction failures stay per-record decisions, not parse failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<RawContent>,
}

/// `message.content` is either a plain string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Parts(Vec<RawPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPart {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Tool name for `tool_use` parts.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct ParsedLine {
    /// 1-based line number within the transcript file.
    pub line_no: usize,
    pub result: Result<RawRecord>,
}

pub struct TranscriptReader {
    root: PathBuf,
    modified_since: Option<SystemTime>,
}

impl TranscriptReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modified_since: None,
        }
    }

    /// Restrict [`transcript_files`](Self::transcript_files) to files modified
    /// at or after `since`. Used by incremental sync.
    pub fn modified_since(mut self, since: SystemTime) -> Self {
        self.modified_since = Some(since);
        self
    }

    /// All `*.jsonl` files under the root in path order. Unreadable directory
    /// entries are logged and skipped rather than failing the walk.
    pub fn transcript_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, stage = "scan", "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
            .filter(|e| match self.modified_since {
                None => true,
                // A file whose mtime cannot be read is kept: over-ingesting is
                // safe (dedup catches it), silently dropping a file is not.
                Some(since) => e
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(|mtime| mtime >= since)
                    .unwrap_or(true),
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// Stream one file's records lazily. The iterator is restartable
    /// file-by-file but not mid-file.
    pub fn read_records(&self, path: &Path) -> Result<RecordLines> {
        let file = File::open(path)
            .with_context(|| format!("opening transcript {}", path.display()))?;
        Ok(RecordLines {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

pub struct RecordLines {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for RecordLines {
    type Item = ParsedLine;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            match line {
                Err(err) => {
                    return Some(ParsedLine {
                        line_no: self.line_no,
                        result: Err(err).context("reading transcript line"),
                    });
                }
                Ok(raw) => {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let result = serde_json::from_str::<RawRecord>(&raw)
                        .with_context(|| format!("parsing transcript line {}", self.line_no));
                    return Some(ParsedLine {
                        line_no: self.line_no,
                        result,
                    });
                }
            }
        }
    }
}
