use engram_core::{Entry, FeedbackSentiment, bounded};

use crate::error::StoreError;

/// Partial metadata update applied atomically to one entry. Only the fields
/// the back-fill engine and feedback processing are allowed to touch exist
/// here, so immutable identity/provenance/content fields cannot be patched
/// by construction.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub previous_message_id: Option<String>,
    pub next_message_id: Option<String>,
    pub message_sequence_position: Option<usize>,
    pub related_solution_id: Option<String>,
    pub feedback_message_id: Option<String>,
    pub relationship_confidence: Option<f32>,
    pub backfill_timestamp: Option<String>,
    pub backfill_processed: Option<bool>,
    pub user_feedback_sentiment: Option<FeedbackSentiment>,
    pub is_feedback_to_solution: Option<bool>,
    pub is_validated_solution: Option<bool>,
    pub is_refuted_attempt: Option<bool>,
    pub validation_strength: Option<f32>,
    pub outcome_certainty: Option<f32>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.previous_message_id.is_none()
            && self.next_message_id.is_none()
            && self.message_sequence_position.is_none()
            && self.related_solution_id.is_none()
            && self.feedback_message_id.is_none()
            && self.relationship_confidence.is_none()
            && self.backfill_timestamp.is_none()
            && self.backfill_processed.is_none()
            && self.user_feedback_sentiment.is_none()
            && self.is_feedback_to_solution.is_none()
            && self.is_validated_solution.is_none()
            && self.is_refuted_attempt.is_none()
            && self.validation_strength.is_none()
            && self.outcome_certainty.is_none()
    }

    /// Apply to an entry, enforcing score bounds and the mutual exclusion of
    /// validated/refuted. Violating the exclusion is a structural error.
    pub fn apply(&self, entry: &mut Entry) -> Result<(), StoreError> {
        if let Some(v) = &self.previous_message_id {
            entry.previous_message_id = v.clone();
        }
        if let Some(v) = &self.next_message_id {
            entry.next_message_id = v.clone();
        }
        if let Some(v) = self.message_sequence_position {
            entry.message_sequence_position = v;
        }
        if let Some(v) = &self.related_solution_id {
            entry.related_solution_id = v.clone();
        }
        if let Some(v) = &self.feedback_message_id {
            entry.feedback_message_id = v.clone();
        }
        if let Some(v) = self.relationship_confidence {
            entry.relationship_confidence = bounded("relationship_confidence", v, 0.0, 2.0);
        }
        if let Some(v) = &self.backfill_timestamp {
            entry.backfill_timestamp = Some(v.clone());
        }
        if let Some(v) = self.backfill_processed {
            entry.backfill_processed = v;
        }
        if let Some(v) = self.user_feedback_sentiment {
            entry.user_feedback_sentiment = v;
        }
        if let Some(v) = self.is_feedback_to_solution {
            entry.is_feedback_to_solution = v;
        }
        if let Some(v) = self.is_validated_solution {
            entry.is_validated_solution = v;
        }
        if let Some(v) = self.is_refuted_attempt {
            entry.is_refuted_attempt = v;
        }
        if let Some(v) = self.validation_strength {
            entry.validation_strength = bounded("validation_strength", v, 0.0, 1.0);
        }
        if let Some(v) = self.outcome_certainty {
            entry.outcome_certainty = bounded("outcome_certainty", v, 0.0, 1.0);
        }

        if entry.is_validated_solution && entry.is_refuted_attempt {
            return Err(StoreError::Structural(format!(
                "entry {} patched to be both validated and refuted",
                entry.id
            )));
        }
        Ok(())
    }
}
