//! Raw transcript records → canonical entries.
//!
//! A pure function: every extraction rule either produces a field or a
//! logged, coded skip. There are no silent defaults and no sentinel ids — a
//! record that cannot yield a real identity is rejected, never stored under a
//! placeholder.

use std::path::Path;
use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use engram_core::{Entry, Role, entry_id};

use crate::reader::{RawContent, RawRecord};

/// Per-record extraction failures. Recoverable: the record is skipped, the
/// reason is logged at WARN and counted by the ingestion quality monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("record carries no role in message.role or type")]
    NoRole,
    #[error("record content is empty after extraction")]
    EmptyContent,
    #[error("record carries no sessionId")]
    MissingSessionId,
}

impl SkipReason {
    pub fn code(self) -> &'static str {
        match self {
            SkipReason::NoRole => "no_role",
            SkipReason::EmptyContent => "empty_content",
            SkipReason::MissingSessionId => "missing_session_id",
        }
    }
}

/// File-scoped context for one record: the transcript file name and the
/// record's per-session monotonic sequence index (stable across runs because
/// it counts raw records in file order, skipped or not).
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub file_name: &'a str,
    pub sequence: usize,
}

pub fn normalize(ctx: RecordContext<'_>, raw: &RawRecord) -> Result<Entry, SkipReason> {
    let record_ref = raw.uuid.as_deref().unwrap_or("<no-uuid>");

    // sessionId is the identity root; without it nothing downstream is safe.
    let session_id = match raw.session_id.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => {
            warn!(
                entry_id = record_ref,
                file_path = ctx.file_name,
                reason = SkipReason::MissingSessionId.code(),
                "skipping record"
            );
            return Err(SkipReason::MissingSessionId);
        }
    };

    // Role: message.role wins, the line-level type is the fallback.
    let role_str = raw
        .message
        .as_ref()
        .and_then(|m| m.role.as_deref())
        .or(raw.kind.as_deref());
    let Some(role) = role_str.and_then(Role::parse) else {
        warn!(
            entry_id = record_ref,
            session_id,
            file_path = ctx.file_name,
            reason = SkipReason::NoRole.code(),
            "skipping record"
        );
        return Err(SkipReason::NoRole);
    };

    // Content: plain string, or the concatenated text parts. Tool-use parts
    // contribute the tool name, not content.
    let mut tools_used = std::collections::BTreeSet::new();
    let content = match raw.message.as_ref().and_then(|m| m.content.as_ref()) {
        Some(RawContent::Text(text)) => text.trim().to_string(),
        Some(RawContent::Parts(parts)) => {
            let mut pieces: Vec<&str> = Vec::new();
            for part in parts {
                match part.kind.as_deref() {
                    Some("text") => {
                        if let Some(text) = part.text.as_deref() {
                            pieces.push(text);
                        }
                    }
                    Some("tool_use") => {
                        if let Some(name) = part.name.as_deref() {
                            tools_used.insert(name.to_string());
                        }
                    }
                    _ => {}
                }
            }
            pieces.join("\n").trim().to_string()
        }
        None => String::new(),
    };
    if content.is_empty() {
        warn!(
            entry_id = record_ref,
            session_id,
            file_path = ctx.file_name,
            reason = SkipReason::EmptyContent.code(),
            "skipping record"
        );
        return Err(SkipReason::EmptyContent);
    }

    // Project provenance: the cwd's leaf directory. A missing or home-dir cwd
    // degrades to "unknown" with a WARN but keeps the entry.
    let (project_path, project_name) = match raw.cwd.as_deref().map(str::trim) {
        Some(cwd) if !cwd.is_empty() && !is_home_dir(cwd) => {
            let leaf = Path::new(cwd)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (cwd.to_string(), leaf)
        }
        other => {
            warn!(
                entry_id = record_ref,
                session_id,
                file_path = ctx.file_name,
                cwd = other.unwrap_or(""),
                "cwd missing or home directory, project_name set to unknown"
            );
            (other.unwrap_or("").to_string(), "unknown".to_string())
        }
    };

    let timestamp = raw.timestamp.clone().unwrap_or_default();
    let timestamp_unix = match DateTime::parse_from_rfc3339(&timestamp) {
        Ok(dt) => dt.timestamp(),
        Err(_) => {
            warn!(
                entry_id = record_ref,
                session_id,
                file_path = ctx.file_name,
                timestamp = %timestamp,
                "unparseable timestamp, timestamp_unix defaulted to 0"
            );
            0
        }
    };

    let id = entry_id(session_id, ctx.sequence, role);
    let content_hash = sha256_hex(&content);
    let has_code = detect_code(&content);

    let mut entry = Entry::new(
        id,
        content_hash,
        session_id.to_string(),
        ctx.file_name.to_string(),
        project_path,
        project_name,
        timestamp,
        timestamp_unix,
        content,
        role,
        ctx.sequence,
    );
    entry.has_code = has_code;
    entry.tools_used = tools_used;
    Ok(entry)
}

fn is_home_dir(cwd: &str) -> bool {
    dirs::home_dir().is_some_and(|home| Path::new(cwd) == home)
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fenced blocks or common language tokens. Deliberately loose: `has_code` is
/// a ranking signal, not a classifier.
fn detect_code(content: &str) -> bool {
    static CODE_RE: OnceLock<Regex> = OnceLock::new();
    let re = CODE_RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ```
            | \bfn\s+\w+\s*\(
            | \bdef\s+\w+\s*\(
            | \bclass\s+\w+
            | \bimpl\s+\w+
            | \#include\s*<
            | \bimport\s+[\w.{]
            | \blet\s+\w+\s*=
            | \bconst\s+\w+\s*=
            | =>\s*\{
            ",
        )
        .expect("code detection regex is valid")
    });
    re.is_match(content)
}
