//! Unified search: one retrieval primitive behind every query surface.
//!
//! A request's mode compiles to a metadata filter, the store answers an
//! over-fetched k-NN under that filter, and the candidates are reranked with
//! the bounded boosts from [`crate::boosts`]. Results are deterministically
//! ordered: final score desc, then recency desc, then id asc. A store
//! failure surfaces as an error — never as a silently partial result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use engram_config::AppConfig;
use engram_core::Entry;
use engram_store::{ConversationStore, MetadataFilter};

use crate::boosts::{
    AppliedBoosts, adaptive_boost, enforce_adaptive_fairness, freshness_boost, project_boost,
    semantic_confidence_boost, validation_boost,
};
use crate::request::{Recency, SearchError, SearchMode, SearchRequest, ValidationPreference};

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Entry,
    /// Normalised vector similarity in [0, 1], before boosts.
    pub similarity: f32,
    pub final_score: f32,
    pub applied_boosts: AppliedBoosts,
    pub context_chain: Option<ContextChain>,
}

/// Surrounding conversation turns, resolved by following the chain ids.
#[derive(Debug, Clone, Default)]
pub struct ContextChain {
    pub before: Vec<Entry>,
    pub after: Vec<Entry>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Distinguishes "nothing matched" from a truncated page.
    pub zero_hits: bool,
}

pub struct SearchEngine {
    store: Arc<ConversationStore>,
    config: engram_config::SearchConfig,
    tech_stacks: BTreeMap<String, BTreeSet<String>>,
    chain_context: usize,
}

impl SearchEngine {
    pub fn new(store: Arc<ConversationStore>, config: &AppConfig) -> Self {
        Self {
            store,
            config: config.search.clone(),
            tech_stacks: config.project_tech_stacks.clone(),
            chain_context: config.backfill.chain_context_size,
        }
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        self.search_at(request, Utc::now().timestamp())
    }

    /// Same as [`search`](Self::search) with an explicit clock, so recency
    /// behaviour is testable.
    pub fn search_at(
        &self,
        request: &SearchRequest,
        now_unix: i64,
    ) -> Result<SearchResponse, SearchError> {
        if request.query_text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if request.mode == SearchMode::ByTopic
            && request.topic_focus.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(SearchError::MissingTopicFocus);
        }

        let limit = if request.limit == 0 {
            self.config.default_limit
        } else {
            request.limit.min(self.config.max_limit)
        };
        let fetch = (limit * self.config.over_fetch_factor).min(self.config.over_fetch_ceiling);

        let filter = self.compile_filter(request, now_unix);
        let candidates = self.store.query(&request.query_text, fetch, &filter)?;
        debug!(
            stage = "search",
            candidates = candidates.len(),
            fetch,
            limit,
            "unified search candidates fetched"
        );

        // Adaptive boosts are computed for the whole candidate set first so
        // the fairness guard can bound their spread.
        let adaptive: Vec<f32> = match (&request.cultural_profile, request.use_adaptive_learning) {
            (Some(profile), true) => {
                let mut boosts: Vec<f32> = candidates
                    .iter()
                    .map(|hit| adaptive_boost(&hit.entry, profile))
                    .collect();
                enforce_adaptive_fairness(&mut boosts);
                boosts
            }
            _ => vec![1.0; candidates.len()],
        };

        let freshness_applies = request.recency.is_some() && request.mode != SearchMode::RecentOnly;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .zip(adaptive)
            .map(|(hit, adaptive)| {
                let similarity = ((2.0 - hit.distance) / 2.0).clamp(0.0, 1.0);
                let boosts = AppliedBoosts {
                    project: project_boost(
                        &hit.entry.project_name,
                        request.project_context.as_deref(),
                        &self.tech_stacks,
                    ),
                    validation: if request.use_validation_boost {
                        validation_boost(&hit.entry, self.config.validation_alpha)
                    } else {
                        1.0
                    },
                    semantic: semantic_confidence_boost(&hit.entry),
                    adaptive,
                    freshness: if freshness_applies {
                        freshness_boost(
                            now_unix,
                            hit.entry.timestamp_unix,
                            self.config.freshness_beta,
                        )
                    } else {
                        1.0
                    },
                };
                SearchHit {
                    final_score: similarity * boosts.product(),
                    similarity,
                    applied_boosts: boosts,
                    context_chain: None,
                    entry: hit.entry,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| b.entry.timestamp_unix.cmp(&a.entry.timestamp_unix))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(limit);

        if request.include_context_chains {
            for hit in &mut hits {
                hit.context_chain = Some(self.resolve_chain(&hit.entry)?);
            }
        }

        Ok(SearchResponse {
            zero_hits: hits.is_empty(),
            hits,
        })
    }

    fn compile_filter(&self, request: &SearchRequest, now_unix: i64) -> MetadataFilter {
        let mut filter = MetadataFilter::default();
        match request.mode {
            SearchMode::Semantic => {}
            SearchMode::ValidatedOnly => filter.is_validated_solution = Some(true),
            SearchMode::FailedOnly => filter.is_refuted_attempt = Some(true),
            SearchMode::RecentOnly => {
                let range = request.recency.unwrap_or(Recency::ThisWeek).seconds();
                filter.min_timestamp_unix = Some(now_unix - range);
            }
            SearchMode::ByTopic => {
                filter.primary_topic = request.topic_focus.clone();
            }
        }

        if request.include_code_only {
            filter.has_code = Some(true);
        }
        if request.validation_preference == ValidationPreference::ValidatedOnly {
            filter.is_validated_solution = Some(true);
        }
        filter
    }

    /// Walk the adjacency chain up to the configured bound in each direction.
    /// A dangling id terminates the walk instead of failing the search.
    fn resolve_chain(&self, entry: &Entry) -> Result<ContextChain, SearchError> {
        let mut chain = ContextChain::default();

        let mut cursor = entry.previous_message_id.clone();
        while !cursor.is_empty() && chain.before.len() < self.chain_context {
            match self.store.get(&cursor)? {
                None => break,
                Some(previous) => {
                    cursor = previous.previous_message_id.clone();
                    chain.before.push(previous);
                }
            }
        }
        chain.before.reverse();

        let mut cursor = entry.next_message_id.clone();
        while !cursor.is_empty() && chain.after.len() < self.chain_context {
            match self.store.get(&cursor)? {
                None => break,
                Some(next) => {
                    cursor = next.next_message_id.clone();
                    chain.after.push(next);
                }
            }
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use engram_core::{FeedbackSentiment, Role, entry_id};
    use engram_embedding::HashedEncoder;

    use super::*;

    const NOW: i64 = 1_750_000_000;

    fn entry(session: &str, seq: usize, role: Role, project: &str, content: &str) -> Entry {
        let mut e = Entry::new(
            entry_id(session, seq, role),
            format!("hash-{session}-{seq}"),
            session.to_string(),
            format!("{session}.jsonl"),
            format!("/home/u/{project}"),
            project.to_string(),
            "2025-06-01T12:00:00Z".into(),
            NOW - 3_600 - seq as i64,
            content.to_string(),
            role,
            seq,
        );
        e.relationship_confidence = 1.0;
        e
    }

    fn engine_with(entries: &[Entry]) -> (SearchEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConversationStore::open(dir.path(), Arc::new(HashedEncoder::default()), 50).unwrap(),
        );
        store.upsert_many(entries).unwrap();
        let engine = SearchEngine::new(store, &AppConfig::default());
        (engine, dir)
    }

    #[test]
    fn empty_query_is_a_validation_error() {
        let (engine, _dir) = engine_with(&[]);
        let err = engine.search_at(&SearchRequest::new("  "), NOW).unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
    }

    #[test]
    fn by_topic_requires_topic_focus() {
        let (engine, _dir) = engine_with(&[]);
        let mut request = SearchRequest::new("anything");
        request.mode = SearchMode::ByTopic;
        let err = engine.search_at(&request, NOW).unwrap_err();
        assert!(matches!(err, SearchError::MissingTopicFocus));
    }

    #[test]
    fn no_match_returns_zero_hit_indicator() -> Result<()> {
        let (engine, _dir) = engine_with(&[]);
        let response = engine.search_at(&SearchRequest::new("anything at all"), NOW)?;
        assert!(response.zero_hits);
        assert!(response.hits.is_empty());
        Ok(())
    }

    #[test]
    fn project_affinity_outranks_identical_content() -> Result<()> {
        // Same content in two projects; the caller's project must win with a
        // reported ×1.5 against ×1.0.
        let entries = vec![
            entry("s1", 0, Role::Assistant, "projA", "use a connection pool for the database"),
            entry("s2", 0, Role::Assistant, "projB", "use a connection pool for the database"),
        ];
        let (engine, _dir) = engine_with(&entries);

        let mut request = SearchRequest::new("database connection pool");
        request.project_context = Some("projA".into());
        let response = engine.search_at(&request, NOW)?;

        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].entry.project_name, "projA");
        assert_eq!(response.hits[0].applied_boosts.project, 1.5);
        assert_eq!(response.hits[1].applied_boosts.project, 1.0);
        assert!(response.hits[0].final_score > response.hits[1].final_score);
        Ok(())
    }

    #[test]
    fn validated_only_mode_filters_to_flagged_entries() -> Result<()> {
        let mut entries = Vec::new();
        for i in 0..20 {
            let mut e = entry("s1", i, Role::Assistant, "projA", "fix the flaky test runner");
            e.is_validated_solution = i < 3;
            entries.push(e);
        }
        let (engine, _dir) = engine_with(&entries);

        let mut request = SearchRequest::new("flaky test runner");
        request.mode = SearchMode::ValidatedOnly;
        request.limit = 20;
        let response = engine.search_at(&request, NOW)?;

        assert_eq!(response.hits.len(), 3);
        assert!(response.hits.iter().all(|h| h.entry.is_validated_solution));
        Ok(())
    }

    #[test]
    fn failed_only_mode_returns_refuted_attempts() -> Result<()> {
        let mut good = entry("s1", 0, Role::Assistant, "projA", "patch the parser");
        good.is_validated_solution = true;
        let mut bad = entry("s1", 1, Role::Assistant, "projA", "patch the parser differently");
        bad.is_refuted_attempt = true;
        let (engine, _dir) = engine_with(&[good, bad.clone()]);

        let mut request = SearchRequest::new("patch the parser");
        request.mode = SearchMode::FailedOnly;
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].entry.id, bad.id);
        Ok(())
    }

    #[test]
    fn recent_only_mode_filters_by_age() -> Result<()> {
        let mut old = entry("s1", 0, Role::User, "projA", "how to rotate the api key");
        old.timestamp_unix = NOW - 60 * 86_400;
        let recent = entry("s1", 1, Role::User, "projA", "how to rotate the api key today");
        let (engine, _dir) = engine_with(&[old, recent.clone()]);

        let mut request = SearchRequest::new("rotate api key");
        request.mode = SearchMode::RecentOnly;
        request.recency = Some(Recency::ThisWeek);
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].entry.id, recent.id);
        Ok(())
    }

    #[test]
    fn validation_boost_prefers_validated_answer() -> Result<()> {
        let mut validated =
            entry("s1", 0, Role::Assistant, "projA", "pin the dependency version");
        validated.is_validated_solution = true;
        validated.validation_strength = 1.0;
        let plain = entry("s2", 0, Role::Assistant, "projA", "pin the dependency version");
        let (engine, _dir) = engine_with(&[validated.clone(), plain]);

        let mut request = SearchRequest::new("pin dependency version");
        request.use_validation_boost = true;
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits[0].entry.id, validated.id);
        assert!(response.hits[0].applied_boosts.validation > 1.0);
        assert!((1.0..=1.8).contains(&response.hits[0].applied_boosts.validation));
        Ok(())
    }

    #[test]
    fn scores_are_non_increasing_and_ties_deterministic() -> Result<()> {
        let entries: Vec<Entry> = (0..8)
            .map(|i| entry("s1", i, Role::User, "projA", "identical content for tie breaking"))
            .collect();
        let (engine, _dir) = engine_with(&entries);

        let mut request = SearchRequest::new("identical content");
        request.limit = 8;
        let response = engine.search_at(&request, NOW)?;

        for pair in response.hits.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
            if (pair[0].final_score - pair[1].final_score).abs() < f32::EPSILON {
                // timestamp desc, then id asc
                assert!(
                    pair[0].entry.timestamp_unix > pair[1].entry.timestamp_unix
                        || (pair[0].entry.timestamp_unix == pair[1].entry.timestamp_unix
                            && pair[0].entry.id < pair[1].entry.id)
                );
            }
        }
        Ok(())
    }

    #[test]
    fn context_chains_follow_adjacency_ids() -> Result<()> {
        let mut first = entry("s1", 0, Role::User, "projA", "the build is broken");
        let mut second = entry("s1", 1, Role::Assistant, "projA", "run cargo clean to fix it");
        let mut third = entry("s1", 2, Role::User, "projA", "thanks that fixed the build");
        first.next_message_id = second.id.clone();
        second.previous_message_id = first.id.clone();
        second.next_message_id = third.id.clone();
        third.previous_message_id = second.id.clone();
        let (engine, _dir) = engine_with(&[first.clone(), second.clone(), third.clone()]);

        let mut request = SearchRequest::new("run cargo clean fix");
        request.include_context_chains = true;
        request.limit = 1;
        let response = engine.search_at(&request, NOW)?;

        let chain = response.hits[0].context_chain.as_ref().expect("chain resolved");
        assert_eq!(chain.before.first().map(|e| e.id.clone()), Some(first.id));
        assert_eq!(chain.after.first().map(|e| e.id.clone()), Some(third.id));
        Ok(())
    }

    #[test]
    fn by_topic_mode_filters_on_primary_topic() -> Result<()> {
        let mut debugging = entry("s1", 0, Role::Assistant, "projA", "inspect the stack trace");
        debugging.primary_topic = "debugging".into();
        let mut testing = entry("s1", 1, Role::Assistant, "projA", "inspect the failing test");
        testing.primary_topic = "testing".into();
        let (engine, _dir) = engine_with(&[debugging.clone(), testing]);

        let mut request = SearchRequest::new("inspect the failure");
        request.mode = SearchMode::ByTopic;
        request.topic_focus = Some("debugging".into());
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].entry.id, debugging.id);
        Ok(())
    }

    #[test]
    fn code_only_filter_drops_prose_entries() -> Result<()> {
        let mut with_code = entry("s1", 0, Role::Assistant, "projA", "apply this patch now");
        with_code.has_code = true;
        let prose = entry("s1", 1, Role::Assistant, "projA", "apply this patch now");
        let (engine, _dir) = engine_with(&[with_code.clone(), prose]);

        let mut request = SearchRequest::new("apply patch");
        request.include_code_only = true;
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].entry.has_code);
        Ok(())
    }

    #[test]
    fn recency_outside_recent_mode_becomes_a_freshness_boost() -> Result<()> {
        let mut old = entry("s1", 0, Role::User, "projA", "rotate the signing key");
        old.timestamp_unix = NOW - 60 * 86_400;
        let (engine, _dir) = engine_with(&[old]);

        let mut request = SearchRequest::new("rotate signing key");
        request.recency = Some(Recency::ThisWeek);
        let response = engine.search_at(&request, NOW)?;
        // Old entry is still returned (no filter), but carries the boost.
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].applied_boosts.freshness > 1.0);
        Ok(())
    }

    #[test]
    fn adaptive_boost_requires_flag_and_profile() -> Result<()> {
        let mut e = entry("s1", 0, Role::Assistant, "projA", "refactor the handler");
        e.primary_topic = "debugging".into();
        let (engine, _dir) = engine_with(&[e]);

        let mut profile = crate::request::CulturalProfile::new();
        profile.insert("preferred_topics".into(), "debugging".into());

        let mut request = SearchRequest::new("refactor handler");
        request.cultural_profile = Some(profile);
        // Flag off: profile alone must not change scores.
        let response = engine.search_at(&request, NOW)?;
        assert_eq!(response.hits[0].applied_boosts.adaptive, 1.0);

        request.use_adaptive_learning = true;
        let boosted = engine.search_at(&request, NOW)?;
        assert!(boosted.hits[0].applied_boosts.adaptive > 1.0);
        Ok(())
    }
}
