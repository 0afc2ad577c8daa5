use std::collections::BTreeMap;

use thiserror::Error;

use engram_store::StoreError;

/// Search modes select the base metadata filter; everything else about the
/// request is an orthogonal modifier. A closed enumeration on purpose — new
/// behaviours are new modes, not plugin hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Semantic,
    ValidatedOnly,
    FailedOnly,
    RecentOnly,
    ByTopic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPreference {
    #[default]
    Neutral,
    ValidatedOnly,
    IncludeFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Today,
    ThisWeek,
    ThisMonth,
    ThisQuarter,
}

impl Recency {
    pub fn seconds(self) -> i64 {
        match self {
            Recency::Today => 60 * 60 * 24,
            Recency::ThisWeek => 60 * 60 * 24 * 7,
            Recency::ThisMonth => 60 * 60 * 24 * 30,
            Recency::ThisQuarter => 60 * 60 * 24 * 90,
        }
    }
}

/// Opaque adaptive-learning input. The engine only reads well-known keys
/// (`group`, `preferred_topics`, `prefers_code`); unknown keys pass through
/// untouched so the personalisation layer can evolve independently.
pub type CulturalProfile = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query_text: String,
    pub mode: SearchMode,
    /// Required iff `mode == ByTopic`.
    pub topic_focus: Option<String>,
    /// Project affinity input. Never filters — it boosts.
    pub project_context: Option<String>,
    pub include_code_only: bool,
    pub validation_preference: ValidationPreference,
    pub recency: Option<Recency>,
    pub use_validation_boost: bool,
    pub include_context_chains: bool,
    pub use_adaptive_learning: bool,
    pub cultural_profile: Option<CulturalProfile>,
    /// 0 means "use the configured default".
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query text must not be empty")]
    EmptyQuery,
    #[error("mode by_topic requires a topic_focus")]
    MissingTopicFocus,
    #[error(transparent)]
    Store(#[from] StoreError),
}
