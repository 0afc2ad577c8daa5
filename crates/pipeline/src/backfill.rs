//! Post-ingestion chain and relationship back-fill.
//!
//! Real-time ingestion cannot see future messages, so adjacency pointers and
//! solution↔feedback links are reconstructed here once a session is stably
//! on disk. The pass is idempotent: ordering and pairing are deterministic
//! functions of stored, immutable data, so a second run rewrites the same
//! values (only `backfill_timestamp` moves). Immutable fields are
//! unreachable by construction — everything is written through
//! [`MetadataPatch`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use engram_core::{Entry, Role};
use engram_enhance::apply_feedback_to_solution;
use engram_store::{ConversationStore, MetadataPatch, StoreError};

/// Relationship confidence tiers: adjacent pairing with pattern+semantic
/// agreement, plain adjacent pairing, and window-distance (heuristic) pairing.
const CONFIDENCE_AGREEING: f32 = 1.5;
const CONFIDENCE_ADJACENT: f32 = 1.0;
const CONFIDENCE_HEURISTIC: f32 = 0.8;

#[derive(Debug, Clone, Default)]
pub struct SessionBackfillReport {
    pub session_id: String,
    pub entries: usize,
    /// Interior entries (both neighbours exist) that ended up fully linked.
    pub interior_linked: usize,
    pub interior_total: usize,
    pub feedback_pairs: usize,
    pub failed_updates: usize,
}

pub struct BackfillEngine {
    store: Arc<ConversationStore>,
    window: usize,
}

impl BackfillEngine {
    pub fn new(store: Arc<ConversationStore>, window: usize) -> Self {
        Self {
            store,
            window: window.max(1),
        }
    }

    /// Back-fill one complete session. Per-entry write failures are logged
    /// and counted, never fatal for the session.
    pub fn backfill_session(&self, session_id: &str) -> Result<SessionBackfillReport, StoreError> {
        let entries = self.store.entries_for_session(session_id)?;
        let mut report = SessionBackfillReport {
            session_id: session_id.to_string(),
            entries: entries.len(),
            interior_total: entries.len().saturating_sub(2),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let mut patches: Vec<MetadataPatch> = vec![MetadataPatch::default(); entries.len()];

        // Adjacency: endpoints keep one null side, interior entries get both.
        for (i, patch) in patches.iter_mut().enumerate() {
            patch.previous_message_id =
                Some(if i == 0 { String::new() } else { entries[i - 1].id.clone() });
            patch.next_message_id = Some(match entries.get(i + 1) {
                Some(next) => next.id.clone(),
                None => String::new(),
            });
        }

        // Solution↔feedback pairing: for each assistant solution attempt, the
        // first unclaimed user entry with conclusive sentiment within the
        // window. Forward-only, first match wins, one feedback validates at
        // most one solution.
        let mut claimed: HashSet<usize> = HashSet::new();
        for i in 0..entries.len() {
            let solution = &entries[i];
            if solution.role != Role::Assistant || !solution.is_solution_attempt {
                continue;
            }
            let Some(j) = self.find_feedback(&entries, i, &claimed) else {
                continue;
            };
            claimed.insert(j);
            report.feedback_pairs += 1;

            let user = &entries[j];
            let confidence = pair_confidence(user, j - i);

            // Validation flags come from the shared feedback projection so
            // ingestion's tentative pairing and this pass agree exactly.
            let mut projected = solution.clone();
            projected.is_validated_solution = false;
            projected.is_refuted_attempt = false;
            apply_feedback_to_solution(user, &mut projected);

            let solution_patch = &mut patches[i];
            solution_patch.feedback_message_id = Some(projected.feedback_message_id.clone());
            solution_patch.is_validated_solution = Some(projected.is_validated_solution);
            solution_patch.is_refuted_attempt = Some(projected.is_refuted_attempt);
            solution_patch.relationship_confidence = Some(confidence);

            let user_patch = &mut patches[j];
            user_patch.related_solution_id = Some(solution.id.clone());
            user_patch.relationship_confidence = Some(confidence);

            debug!(
                session_id,
                solution_id = %solution.id,
                feedback_id = %user.id,
                distance = j - i,
                confidence,
                "paired solution with feedback"
            );
        }

        // Write back one entry at a time, stamping the bookkeeping fields.
        let stamp = Utc::now().to_rfc3339();
        for (entry, mut patch) in entries.iter().zip(patches) {
            patch.backfill_timestamp = Some(stamp.clone());
            patch.backfill_processed = Some(true);
            match self.store.update_metadata(&entry.id, &patch) {
                Ok(()) => {}
                Err(err) => {
                    report.failed_updates += 1;
                    warn!(
                        session_id,
                        entry_id = %entry.id,
                        error = %err,
                        stage = "backfill",
                        "metadata update failed, continuing session"
                    );
                }
            }
        }

        // Re-read for the coverage figure so the report reflects what is
        // actually on disk.
        let stored = self.store.entries_for_session(session_id)?;
        report.interior_linked = stored
            .iter()
            .skip(1)
            .take(stored.len().saturating_sub(2))
            .filter(|e| !e.previous_message_id.is_empty() && !e.next_message_id.is_empty())
            .count();

        info!(
            session_id,
            entries = report.entries,
            feedback_pairs = report.feedback_pairs,
            interior_linked = report.interior_linked,
            interior_total = report.interior_total,
            failed_updates = report.failed_updates,
            stage = "backfill",
            "session back-fill complete"
        );
        Ok(report)
    }

    fn find_feedback(
        &self,
        entries: &[Entry],
        solution_idx: usize,
        claimed: &HashSet<usize>,
    ) -> Option<usize> {
        let upper = (solution_idx + self.window).min(entries.len().saturating_sub(1));
        (solution_idx + 1..=upper).find(|&j| {
            entries[j].role == Role::User
                && entries[j].user_feedback_sentiment.is_conclusive()
                && !claimed.contains(&j)
        })
    }
}

fn pair_confidence(user: &Entry, distance: usize) -> f32 {
    if distance > 1 {
        return CONFIDENCE_HEURISTIC;
    }
    let agrees = user
        .semantic
        .as_ref()
        .is_some_and(|s| s.semantic_sentiment == user.user_feedback_sentiment);
    if agrees { CONFIDENCE_AGREEING } else { CONFIDENCE_ADJACENT }
}

#[cfg(test)]
mod tests {
    use engram_core::{FeedbackSentiment, SemanticAnalysis, entry_id};
    use engram_embedding::HashedEncoder;

    use super::*;

    fn entry(session: &str, seq: usize, role: Role, content: &str) -> Entry {
        Entry::new(
            entry_id(session, seq, role),
            format!("hash-{seq}"),
            session.to_string(),
            format!("{session}.jsonl"),
            "/home/u/projA".into(),
            "projA".into(),
            "2025-06-01T12:00:00Z".into(),
            1_748_779_200 + seq as i64,
            content.to_string(),
            role,
            seq,
        )
    }

    fn store_with(entries: &[Entry]) -> (Arc<ConversationStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConversationStore::open(dir.path(), Arc::new(HashedEncoder::default()), 50).unwrap(),
        );
        store.upsert_many(entries).unwrap();
        (store, dir)
    }

    fn six_message_session() -> Vec<Entry> {
        let mut entries = vec![
            entry("s1", 0, Role::User, "Fix this build error"),
            entry("s1", 1, Role::Assistant, "Try running cargo clean first"),
            entry("s1", 2, Role::User, "still failing"),
            entry("s1", 3, Role::Assistant, "Then update the lockfile"),
            entry("s1", 4, Role::User, "thanks, that fixed it"),
            entry("s1", 5, Role::Assistant, "Great."),
        ];
        entries[1].is_solution_attempt = true;
        entries[3].is_solution_attempt = true;
        entries[2].user_feedback_sentiment = FeedbackSentiment::Negative;
        entries[2].validation_strength = 1.0;
        entries[4].user_feedback_sentiment = FeedbackSentiment::Positive;
        entries[4].validation_strength = 1.0;
        entries
    }

    #[test]
    fn adjacency_is_antisymmetric_with_null_endpoints() {
        let (store, _dir) = store_with(&six_message_session());
        let engine = BackfillEngine::new(Arc::clone(&store), 3);
        engine.backfill_session("s1").unwrap();

        let stored = store.entries_for_session("s1").unwrap();
        assert_eq!(stored[0].previous_message_id, "");
        assert_eq!(stored[5].next_message_id, "");
        for pair in stored.windows(2) {
            assert_eq!(pair[0].next_message_id, pair[1].id);
            assert_eq!(pair[1].previous_message_id, pair[0].id);
        }
        for interior in &stored[1..5] {
            assert!(!interior.previous_message_id.is_empty());
            assert!(!interior.next_message_id.is_empty());
        }
    }

    #[test]
    fn solutions_pair_with_their_feedback() {
        let (store, _dir) = store_with(&six_message_session());
        let engine = BackfillEngine::new(Arc::clone(&store), 3);
        let report = engine.backfill_session("s1").unwrap();
        assert_eq!(report.feedback_pairs, 2);

        let stored = store.entries_for_session("s1").unwrap();
        // First attempt refuted by "still failing".
        assert!(stored[1].is_refuted_attempt);
        assert!(!stored[1].is_validated_solution);
        assert_eq!(stored[1].feedback_message_id, stored[2].id);
        assert_eq!(stored[2].related_solution_id, stored[1].id);
        // Second attempt validated by "thanks, that fixed it".
        assert!(stored[3].is_validated_solution);
        assert!(!stored[3].is_refuted_attempt);
        assert_eq!(stored[3].feedback_message_id, stored[4].id);
        assert_eq!(stored[4].related_solution_id, stored[3].id);
    }

    #[test]
    fn feedback_outside_window_is_not_paired() {
        let mut entries = vec![
            entry("s1", 0, Role::Assistant, "Try the first fix"),
            entry("s1", 1, Role::Assistant, "more context"),
            entry("s1", 2, Role::Assistant, "more context again"),
            entry("s1", 3, Role::Assistant, "and more"),
            entry("s1", 4, Role::User, "that fixed it"),
        ];
        entries[0].is_solution_attempt = true;
        entries[4].user_feedback_sentiment = FeedbackSentiment::Positive;
        entries[4].validation_strength = 1.0;
        let (store, _dir) = store_with(&entries);

        let engine = BackfillEngine::new(Arc::clone(&store), 3);
        let report = engine.backfill_session("s1").unwrap();
        assert_eq!(report.feedback_pairs, 0);

        let stored = store.entries_for_session("s1").unwrap();
        assert!(!stored[0].is_validated_solution);
        assert_eq!(stored[0].feedback_message_id, "");
    }

    #[test]
    fn windowed_pairing_lowers_relationship_confidence() {
        let mut entries = vec![
            entry("s1", 0, Role::Assistant, "Try this fix"),
            entry("s1", 1, Role::Assistant, "a clarification"),
            entry("s1", 2, Role::User, "that fixed it"),
        ];
        entries[0].is_solution_attempt = true;
        entries[2].user_feedback_sentiment = FeedbackSentiment::Positive;
        entries[2].validation_strength = 1.0;
        let (store, _dir) = store_with(&entries);

        BackfillEngine::new(Arc::clone(&store), 3)
            .backfill_session("s1")
            .unwrap();
        let stored = store.entries_for_session("s1").unwrap();
        assert_eq!(stored[0].relationship_confidence, CONFIDENCE_HEURISTIC);
    }

    #[test]
    fn semantic_agreement_raises_relationship_confidence() {
        let mut entries = vec![
            entry("s1", 0, Role::Assistant, "Try this fix"),
            entry("s1", 1, Role::User, "that fixed it"),
        ];
        entries[0].is_solution_attempt = true;
        entries[1].user_feedback_sentiment = FeedbackSentiment::Positive;
        entries[1].validation_strength = 1.0;
        entries[1].semantic = Some(SemanticAnalysis {
            semantic_sentiment: FeedbackSentiment::Positive,
            semantic_confidence: 0.8,
            ..SemanticAnalysis::default()
        });
        let (store, _dir) = store_with(&entries);

        BackfillEngine::new(Arc::clone(&store), 3)
            .backfill_session("s1")
            .unwrap();
        let stored = store.entries_for_session("s1").unwrap();
        assert_eq!(stored[0].relationship_confidence, CONFIDENCE_AGREEING);
    }

    #[test]
    fn backfill_is_idempotent_apart_from_the_timestamp() {
        let (store, _dir) = store_with(&six_message_session());
        let engine = BackfillEngine::new(Arc::clone(&store), 3);

        engine.backfill_session("s1").unwrap();
        let first: Vec<Entry> = store.entries_for_session("s1").unwrap();
        engine.backfill_session("s1").unwrap();
        let second: Vec<Entry> = store.entries_for_session("s1").unwrap();

        for (a, b) in first.iter().zip(&second) {
            let mut a = a.clone();
            let mut b = b.clone();
            a.backfill_timestamp = None;
            b.backfill_timestamp = None;
            assert_eq!(a, b, "chain fields must be byte-identical across runs");
        }
        assert!(second.iter().all(|e| e.backfill_processed));
    }
}
