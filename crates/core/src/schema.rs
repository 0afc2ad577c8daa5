//! Canonical record types for indexed conversation entries.
//!
//! An [`Entry`] is one user or assistant turn extracted from a Claude Code
//! transcript. Identity, provenance and content fields are immutable once the
//! entry is stored; derived metadata (topics, solution classification,
//! feedback, chain links) is written at ingestion and refined by the
//! back-fill pass.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Algorithm behind [`Entry::content_hash`]. A compatibility surface: the
/// store pins it and changing it requires a full reindex.
pub const CONTENT_HASH_ALGORITHM: &str = "sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionCategory {
    CodeFix,
    ConfigChange,
    ApproachSuggestion,
    Diagnostic,
    Other,
    #[default]
    None,
}

impl SolutionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SolutionCategory::CodeFix => "code_fix",
            SolutionCategory::ConfigChange => "config_change",
            SolutionCategory::ApproachSuggestion => "approach_suggestion",
            SolutionCategory::Diagnostic => "diagnostic",
            SolutionCategory::Other => "other",
            SolutionCategory::None => "none",
        }
    }
}

/// Feedback sentiment of a user message responding to an assistant solution.
/// `Unset` is serialised as the empty string so stored metadata distinguishes
/// "never analysed" from an explicit `Neutral` verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSentiment {
    Positive,
    Negative,
    Partial,
    Neutral,
    #[default]
    #[serde(rename = "")]
    Unset,
}

impl FeedbackSentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackSentiment::Positive => "positive",
            FeedbackSentiment::Negative => "negative",
            FeedbackSentiment::Partial => "partial",
            FeedbackSentiment::Neutral => "neutral",
            FeedbackSentiment::Unset => "",
        }
    }

    /// Anything that carries an actual verdict, i.e. not `Neutral`/`Unset`.
    pub fn is_conclusive(self) -> bool {
        matches!(
            self,
            FeedbackSentiment::Positive | FeedbackSentiment::Negative | FeedbackSentiment::Partial
        )
    }
}

/// Output of the optional semantic feedback analyzer, stored alongside the
/// pattern-based fields when the `semantic_feedback` enhancement is enabled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticAnalysis {
    pub semantic_sentiment: FeedbackSentiment,
    pub semantic_confidence: f32,
    pub positive_similarity: f32,
    pub negative_similarity: f32,
    pub partial_similarity: f32,
    pub technical_domain: String,
    pub is_complex_outcome: bool,
    /// Agreement between the pattern lexicon verdict and the semantic verdict.
    pub agreement_score: f32,
    /// Which analysis drove the final sentiment: "pattern", "semantic" or "hybrid".
    pub primary_method: String,
    pub requires_manual_review: bool,
}

/// One indexed conversation turn. See the module docs for the mutability
/// contract; the serialised form of this struct is the store's metadata
/// record, so renaming or removing a field requires a reindex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    // ── identity ──────────────────────────────────────────────────────────
    pub id: String,
    pub content_hash: String,

    // ── provenance ────────────────────────────────────────────────────────
    pub session_id: String,
    pub file_name: String,
    pub project_path: String,
    pub project_name: String,
    pub timestamp: String,
    pub timestamp_unix: i64,

    // ── content ───────────────────────────────────────────────────────────
    pub content: String,
    pub content_length: usize,
    pub role: Role,
    pub has_code: bool,
    #[serde(default)]
    pub tools_used: BTreeSet<String>,

    // ── topic detection ───────────────────────────────────────────────────
    #[serde(default)]
    pub detected_topics: BTreeMap<String, f32>,
    #[serde(default)]
    pub primary_topic: String,
    #[serde(default)]
    pub topic_confidence: f32,

    // ── solution classification ───────────────────────────────────────────
    #[serde(default)]
    pub is_solution_attempt: bool,
    #[serde(default)]
    pub solution_category: SolutionCategory,
    #[serde(default)]
    pub solution_quality_score: f32,
    #[serde(default)]
    pub has_success_markers: bool,
    #[serde(default)]
    pub has_quality_indicators: bool,

    // ── feedback & validation ─────────────────────────────────────────────
    #[serde(default)]
    pub user_feedback_sentiment: FeedbackSentiment,
    #[serde(default)]
    pub is_feedback_to_solution: bool,
    #[serde(default)]
    pub is_validated_solution: bool,
    #[serde(default)]
    pub is_refuted_attempt: bool,
    #[serde(default)]
    pub validation_strength: f32,
    #[serde(default)]
    pub outcome_certainty: f32,

    // ── chain (populated by back-fill) ────────────────────────────────────
    #[serde(default)]
    pub previous_message_id: String,
    #[serde(default)]
    pub next_message_id: String,
    #[serde(default)]
    pub message_sequence_position: usize,
    #[serde(default)]
    pub related_solution_id: String,
    #[serde(default)]
    pub feedback_message_id: String,
    #[serde(default = "default_relationship_confidence")]
    pub relationship_confidence: f32,

    // ── back-fill bookkeeping ─────────────────────────────────────────────
    #[serde(default)]
    pub backfill_timestamp: Option<String>,
    #[serde(default)]
    pub backfill_processed: bool,

    // ── semantic validation (optional) ────────────────────────────────────
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticAnalysis>,
}

fn default_relationship_confidence() -> f32 {
    1.0
}

impl Entry {
    /// Construct an entry with identity, provenance and content populated and
    /// every derived field at its neutral default.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        content_hash: String,
        session_id: String,
        file_name: String,
        project_path: String,
        project_name: String,
        timestamp: String,
        timestamp_unix: i64,
        content: String,
        role: Role,
        sequence_position: usize,
    ) -> Self {
        let content_length = content.len();
        Self {
            id,
            content_hash,
            session_id,
            file_name,
            project_path,
            project_name,
            timestamp,
            timestamp_unix,
            content,
            content_length,
            role,
            has_code: false,
            tools_used: BTreeSet::new(),
            detected_topics: BTreeMap::new(),
            primary_topic: String::new(),
            topic_confidence: 0.0,
            is_solution_attempt: false,
            solution_category: SolutionCategory::None,
            solution_quality_score: 0.0,
            has_success_markers: false,
            has_quality_indicators: false,
            user_feedback_sentiment: FeedbackSentiment::Unset,
            is_feedback_to_solution: false,
            is_validated_solution: false,
            is_refuted_attempt: false,
            validation_strength: 0.0,
            outcome_certainty: 0.0,
            previous_message_id: String::new(),
            next_message_id: String::new(),
            message_sequence_position: sequence_position,
            related_solution_id: String::new(),
            feedback_message_id: String::new(),
            relationship_confidence: 1.0,
            backfill_timestamp: None,
            backfill_processed: false,
            semantic: None,
        }
    }
}

/// Compose the deterministic entry id. The sequence index is zero-padded so
/// lexicographic and numeric ordering agree within a session.
pub fn entry_id(session_id: &str, sequence: usize, role: Role) -> String {
    format!("{session_id}_{sequence:04}_{}", role.as_str())
}

/// Enforce a declared confidence range. Out-of-range values are a bug in the
/// producer: debug builds panic, release builds clamp and log a WARN so a bad
/// score cannot silently poison ranking downstream.
pub fn bounded(field: &str, value: f32, min: f32, max: f32) -> f32 {
    debug_assert!(
        (min..=max).contains(&value),
        "{field} = {value} outside [{min}, {max}]"
    );
    if (min..=max).contains(&value) {
        value
    } else {
        warn!(field, value, min, max, validation_failure = "out_of_range", "clamping score");
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry::new(
            entry_id("sess-1", 3, Role::Assistant),
            "abc123".into(),
            "sess-1".into(),
            "sess-1.jsonl".into(),
            "/home/u/projA".into(),
            "projA".into(),
            "2025-06-01T12:00:00Z".into(),
            1_748_779_200,
            "Try adding the missing semicolon".into(),
            Role::Assistant,
            3,
        )
    }

    #[test]
    fn entry_id_is_zero_padded_and_role_suffixed() {
        assert_eq!(entry_id("s", 7, Role::User), "s_0007_user");
        assert_eq!(entry_id("s", 123, Role::Assistant), "s_0123_assistant");
    }

    #[test]
    fn unset_sentiment_serialises_as_empty_string() {
        let json = serde_json::to_string(&FeedbackSentiment::Unset).unwrap();
        assert_eq!(json, "\"\"");
        let back: FeedbackSentiment = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, FeedbackSentiment::Unset);
    }

    #[test]
    fn entry_roundtrips_through_json() {
        let mut entry = sample_entry();
        entry.detected_topics.insert("debugging".into(), 0.4);
        entry.primary_topic = "debugging".into();
        entry.is_solution_attempt = true;

        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn missing_derived_fields_default_on_deserialise() {
        // A minimal record written by an older schema must still load.
        let json = serde_json::json!({
            "id": "s_0001_user",
            "content_hash": "h",
            "session_id": "s",
            "file_name": "s.jsonl",
            "project_path": "/home/u/p",
            "project_name": "p",
            "timestamp": "2025-06-01T12:00:00Z",
            "timestamp_unix": 1,
            "content": "hello",
            "content_length": 5,
            "role": "user",
            "has_code": false,
        });
        let entry: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.relationship_confidence, 1.0);
        assert_eq!(entry.user_feedback_sentiment, FeedbackSentiment::Unset);
        assert!(!entry.backfill_processed);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn bounded_clamps_in_release() {
        assert_eq!(bounded("x", 1.4, 0.0, 1.0), 1.0);
    }

    #[test]
    fn bounded_passes_in_range_values_through() {
        assert_eq!(bounded("x", 0.5, 0.0, 1.0), 0.5);
    }
}
