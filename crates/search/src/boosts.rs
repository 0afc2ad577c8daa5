//! Deterministic multiplicative reranking boosts.
//!
//! Every boost is bounded and documented; the engine applies them in a fixed
//! order (project → validation → semantic confidence → adaptive → freshness)
//! so the same store state and request always produce the same ranking.

use std::collections::{BTreeMap, BTreeSet};

use engram_core::Entry;

use crate::request::CulturalProfile;

/// Exact project match.
pub const PROJECT_EXACT: f32 = 1.5;
/// Projects sharing at least one configured technology token.
pub const PROJECT_SHARED_STACK: f32 = 1.2;
/// Extra factor for an explicitly validated solution (on top of the
/// strength-linear term).
pub const VALIDATED_FACTOR: f32 = 1.2;
/// Semantic-confidence boost range.
pub const SEMANTIC_MIN: f32 = 0.5;
pub const SEMANTIC_MAX: f32 = 2.5;
/// Adaptive boost range and the maximum allowed spread across candidates.
pub const ADAPTIVE_MIN: f32 = 0.7;
pub const ADAPTIVE_MAX: f32 = 1.5;
pub const ADAPTIVE_MAX_DISPARITY: f32 = 0.2;

/// The multipliers actually applied to one candidate, reported alongside the
/// final score so callers can audit a ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedBoosts {
    pub project: f32,
    pub validation: f32,
    pub semantic: f32,
    pub adaptive: f32,
    pub freshness: f32,
}

impl Default for AppliedBoosts {
    fn default() -> Self {
        Self {
            project: 1.0,
            validation: 1.0,
            semantic: 1.0,
            adaptive: 1.0,
            freshness: 1.0,
        }
    }
}

impl AppliedBoosts {
    pub fn product(&self) -> f32 {
        self.project * self.validation * self.semantic * self.adaptive * self.freshness
    }
}

/// ×1.5 for the caller's own project, ×1.2 when the two projects share a
/// configured technology token, ×1.0 otherwise.
pub fn project_boost(
    entry_project: &str,
    project_context: Option<&str>,
    tech_stacks: &BTreeMap<String, BTreeSet<String>>,
) -> f32 {
    let Some(context) = project_context else {
        return 1.0;
    };
    if entry_project == context {
        return PROJECT_EXACT;
    }
    let shared = match (tech_stacks.get(entry_project), tech_stacks.get(context)) {
        (Some(a), Some(b)) => !a.is_disjoint(b),
        _ => false,
    };
    if shared { PROJECT_SHARED_STACK } else { 1.0 }
}

/// ×(1 + alpha·validation_strength), ×1.2 extra when the entry is a validated
/// solution. With alpha = 0.5 the result stays within [1.0, 1.8].
pub fn validation_boost(entry: &Entry, alpha: f32) -> f32 {
    let mut boost = 1.0 + alpha * entry.validation_strength.clamp(0.0, 1.0);
    if entry.is_validated_solution {
        boost *= VALIDATED_FACTOR;
    }
    boost
}

/// Linear in the stored semantic confidence, clamped to [0.5, 2.5]. Entries
/// without a semantic block are left untouched (×1.0).
pub fn semantic_confidence_boost(entry: &Entry) -> f32 {
    match &entry.semantic {
        None => 1.0,
        Some(block) => {
            (SEMANTIC_MIN + 2.0 * block.semantic_confidence.clamp(0.0, 1.0))
                .clamp(SEMANTIC_MIN, SEMANTIC_MAX)
        }
    }
}

/// Per-candidate adaptive boost from the opaque cultural profile, clamped to
/// [0.7, 1.5]. Deterministic in the profile's well-known keys.
pub fn adaptive_boost(entry: &Entry, profile: &CulturalProfile) -> f32 {
    let mut boost = 1.0;
    if let Some(topics) = profile.get("preferred_topics") {
        if !entry.primary_topic.is_empty()
            && topics.split(',').any(|t| t.trim() == entry.primary_topic)
        {
            boost += 0.2;
        }
    }
    if profile.get("prefers_code").is_some_and(|v| v == "true") && entry.has_code {
        boost += 0.15;
    }
    if profile.get("prefers_validated").is_some_and(|v| v == "true")
        && entry.is_validated_solution
    {
        boost += 0.1;
    }
    boost.clamp(ADAPTIVE_MIN, ADAPTIVE_MAX)
}

/// Fairness guard: compress a batch of adaptive boosts toward their mean so
/// the spread across candidates never exceeds [`ADAPTIVE_MAX_DISPARITY`].
pub fn enforce_adaptive_fairness(boosts: &mut [f32]) {
    if boosts.len() < 2 {
        return;
    }
    let max = boosts.iter().copied().fold(f32::MIN, f32::max);
    let min = boosts.iter().copied().fold(f32::MAX, f32::min);
    let spread = max - min;
    if spread <= ADAPTIVE_MAX_DISPARITY {
        return;
    }
    let mean = boosts.iter().sum::<f32>() / boosts.len() as f32;
    let scale = ADAPTIVE_MAX_DISPARITY / spread;
    for b in boosts.iter_mut() {
        *b = (mean + (*b - mean) * scale).clamp(ADAPTIVE_MIN, ADAPTIVE_MAX);
    }
}

/// ×(1 + beta·decay) where decay halves roughly weekly. Only applied when the
/// caller asked for recency without selecting the recent-only mode.
pub fn freshness_boost(now_unix: i64, entry_unix: i64, beta: f32) -> f32 {
    let age_days = ((now_unix - entry_unix).max(0) as f32) / 86_400.0;
    let decay = 1.0 / (1.0 + age_days / 7.0);
    1.0 + beta * decay
}
