//! Per-entry enhancement driver.
//!
//! Runs the enabled capabilities over one normalised entry in isolation:
//! topic detection, solution classification, and (for user replies that
//! follow an assistant solution) the pattern + semantic feedback analysis.
//! Each capability degrades independently — a failing optional subroutine
//! logs a WARN, bumps a counter and leaves the entry's other fields intact.
//! Chain fields stay untouched here; they belong to the back-fill pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use engram_config::{AppConfig, Enhancement};
use engram_core::{Entry, FeedbackSentiment, Role, SemanticAnalysis, bounded};
use engram_embedding::TextEncoder;

use crate::feedback::analyze_feedback;
use crate::semantic::{SemanticFeedbackAnalyzer, detect_domain};
use crate::solution::classify_solution;
use crate::topics::TopicDetector;

/// Feedback below this strength is too weak to flip validation flags on the
/// assistant entry it targets.
const VALIDATION_MIN_STRENGTH: f32 = 0.3;

/// Adjacent-record context for one entry. `previous` is the immediately
/// preceding entry in the same session, when the caller has it at hand; the
/// definitive solution↔feedback pairing is recomputed by back-fill.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingContext<'a> {
    pub previous: Option<&'a Entry>,
}

#[derive(Debug, Clone, Default)]
pub struct EnhancementStats {
    pub topics_run: u64,
    pub solutions_run: u64,
    pub feedback_run: u64,
    pub semantic_run: u64,
    pub semantic_failures: u64,
}

#[derive(Default)]
struct Counters {
    topics_run: AtomicU64,
    solutions_run: AtomicU64,
    feedback_run: AtomicU64,
    semantic_run: AtomicU64,
    semantic_failures: AtomicU64,
}

pub struct EnhancementProcessor {
    topics: Option<TopicDetector>,
    solutions_enabled: bool,
    semantic: Option<SemanticFeedbackAnalyzer>,
    counters: Counters,
}

impl EnhancementProcessor {
    /// Build from configuration. The encoder is only consulted when the
    /// `semantic_feedback` capability is enabled.
    pub fn from_config(config: &AppConfig, encoder: Arc<dyn TextEncoder>) -> Self {
        let topics = config
            .enhancement_enabled(Enhancement::TopicDetection)
            .then(|| TopicDetector::with_defaults(config.enhance.topic_threshold));
        let semantic = config
            .enhancement_enabled(Enhancement::SemanticFeedback)
            .then(|| SemanticFeedbackAnalyzer::new(encoder));
        Self {
            topics,
            solutions_enabled: config.enhancement_enabled(Enhancement::SolutionDetection),
            semantic,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> EnhancementStats {
        EnhancementStats {
            topics_run: self.counters.topics_run.load(Ordering::Relaxed),
            solutions_run: self.counters.solutions_run.load(Ordering::Relaxed),
            feedback_run: self.counters.feedback_run.load(Ordering::Relaxed),
            semantic_run: self.counters.semantic_run.load(Ordering::Relaxed),
            semantic_failures: self.counters.semantic_failures.load(Ordering::Relaxed),
        }
    }

    /// Compute derived metadata for one entry in place.
    pub fn enhance(&self, entry: &mut Entry, ctx: &ProcessingContext<'_>) {
        if let Some(detector) = &self.topics {
            let scores = detector.detect(&entry.content);
            entry.detected_topics = scores.detected;
            entry.primary_topic = scores.primary;
            entry.topic_confidence = bounded("topic_confidence", scores.confidence, 0.0, 1.0);
            self.counters.topics_run.fetch_add(1, Ordering::Relaxed);
        }

        if self.solutions_enabled && entry.role == Role::Assistant {
            let signals = classify_solution(entry.role, &entry.content, entry.has_code);
            entry.is_solution_attempt = signals.is_attempt;
            entry.solution_category = signals.category;
            entry.solution_quality_score = signals.quality;
            entry.has_success_markers = signals.has_success_markers;
            entry.has_quality_indicators = signals.has_quality_indicators;
            self.counters.solutions_run.fetch_add(1, Ordering::Relaxed);
        }

        if entry.role == Role::User {
            self.analyze_user_feedback(entry, ctx);
        }
    }

    /// Feedback analysis runs on user messages that directly follow an
    /// assistant solution attempt.
    fn analyze_user_feedback(&self, entry: &mut Entry, ctx: &ProcessingContext<'_>) {
        let follows_solution = ctx
            .previous
            .is_some_and(|prev| prev.role == Role::Assistant && prev.is_solution_attempt);
        if !follows_solution {
            return;
        }

        let pattern = analyze_feedback(&entry.content);
        self.counters.feedback_run.fetch_add(1, Ordering::Relaxed);

        let mut sentiment = pattern.sentiment;
        let mut strength = pattern.strength;
        let mut certainty = pattern.strength * pattern.confidence;
        let mut primary_method = "pattern".to_string();

        if let Some(analyzer) = &self.semantic {
            match analyzer.analyze(&entry.content) {
                Ok(verdict) => {
                    self.counters.semantic_run.fetch_add(1, Ordering::Relaxed);
                    let agree = verdict.sentiment == pattern.sentiment;
                    let both_conclusive =
                        verdict.sentiment.is_conclusive() && pattern.sentiment.is_conclusive();

                    if agree && both_conclusive {
                        primary_method = "hybrid".to_string();
                        certainty = strength * pattern.confidence.max(verdict.confidence);
                    } else if !pattern.sentiment.is_conclusive()
                        && verdict.sentiment.is_conclusive()
                    {
                        // Lexicon silence, semantic signal: adopt it.
                        primary_method = "semantic".to_string();
                        sentiment = verdict.sentiment;
                        strength = verdict.confidence;
                        certainty = verdict.confidence * verdict.confidence;
                    }

                    entry.semantic = Some(SemanticAnalysis {
                        semantic_sentiment: verdict.sentiment,
                        semantic_confidence: verdict.confidence,
                        positive_similarity: verdict.positive_similarity,
                        negative_similarity: verdict.negative_similarity,
                        partial_similarity: verdict.partial_similarity,
                        technical_domain: detect_domain(&entry.content),
                        is_complex_outcome: sentiment == FeedbackSentiment::Partial,
                        agreement_score: if agree { 1.0 } else { 0.0 },
                        primary_method: primary_method.clone(),
                        requires_manual_review: both_conclusive && !agree,
                    });
                }
                Err(err) => {
                    self.counters.semantic_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        entry_id = %entry.id,
                        session_id = %entry.session_id,
                        error = %err,
                        stage = "semantic_feedback",
                        "semantic analyzer failed, keeping pattern result"
                    );
                }
            }
        }

        entry.user_feedback_sentiment = sentiment;
        entry.is_feedback_to_solution = sentiment.is_conclusive();
        entry.validation_strength = bounded("validation_strength", strength, 0.0, 1.0);
        entry.outcome_certainty = bounded("outcome_certainty", certainty, 0.0, 1.0);
        if entry.is_feedback_to_solution {
            if let Some(prev) = ctx.previous {
                entry.related_solution_id = prev.id.clone();
            }
        }
    }
}

/// Project a user entry's feedback verdict onto the assistant solution it
/// targets. Shared by ingestion (tentative, immediate-predecessor pairing)
/// and back-fill (definitive, windowed pairing). Positive feedback validates,
/// negative refutes, partial records the link without flipping either flag;
/// the two flags stay mutually exclusive.
pub fn apply_feedback_to_solution(user: &Entry, assistant: &mut Entry) {
    if !user.user_feedback_sentiment.is_conclusive() {
        return;
    }
    assistant.feedback_message_id = user.id.clone();
    let strong_enough = user.validation_strength >= VALIDATION_MIN_STRENGTH;
    match user.user_feedback_sentiment {
        FeedbackSentiment::Positive if strong_enough => {
            assistant.is_validated_solution = true;
            assistant.is_refuted_attempt = false;
        }
        FeedbackSentiment::Negative if strong_enough => {
            assistant.is_refuted_attempt = true;
            assistant.is_validated_solution = false;
        }
        _ => {}
    }
}
