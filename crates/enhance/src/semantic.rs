//! Embedding-based feedback analysis.
//!
//! Three pattern clusters (positive / negative / partial exemplar phrases)
//! are embedded once through the shared encoder and averaged into centroids.
//! A user message is scored by cosine similarity against each centroid; the
//! argmax above a floor becomes the semantic sentiment. This analyzer is
//! optional — when it is disabled or fails, the lexicon pass stands alone.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};

use engram_core::{FeedbackSentiment, bounded};
use engram_embedding::TextEncoder;

const POSITIVE_CLUSTER: &[&str] = &[
    "that fixed it, thank you",
    "works perfectly now",
    "great, the error is gone",
    "that solved the problem",
    "confirmed, everything passes now",
    "that was exactly the fix",
];
const NEGATIVE_CLUSTER: &[&str] = &[
    "it is still broken",
    "that didn't work at all",
    "I'm getting the same error",
    "the build is still failing",
    "that made things worse",
    "no, the problem is still there",
];
const PARTIAL_CLUSTER: &[&str] = &[
    "that helped but there's still an issue",
    "it's closer but not fully working",
    "some progress, one error remains",
    "partially fixed, the other case still fails",
    "better, but not quite right yet",
];

/// Minimum winning similarity for the semantic verdict to be conclusive.
const MIN_SIMILARITY: f32 = 0.35;

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticVerdict {
    pub sentiment: FeedbackSentiment,
    pub confidence: f32,
    pub positive_similarity: f32,
    pub negative_similarity: f32,
    pub partial_similarity: f32,
}

struct Centroids {
    positive: Vec<f32>,
    negative: Vec<f32>,
    partial: Vec<f32>,
}

pub struct SemanticFeedbackAnalyzer {
    encoder: Arc<dyn TextEncoder>,
    centroids: OnceCell<Centroids>,
}

impl SemanticFeedbackAnalyzer {
    pub fn new(encoder: Arc<dyn TextEncoder>) -> Self {
        Self {
            encoder,
            centroids: OnceCell::new(),
        }
    }

    fn centroids(&self) -> Result<&Centroids> {
        self.centroids.get_or_try_init(|| {
            Ok(Centroids {
                positive: self.centroid(POSITIVE_CLUSTER).context("positive cluster")?,
                negative: self.centroid(NEGATIVE_CLUSTER).context("negative cluster")?,
                partial: self.centroid(PARTIAL_CLUSTER).context("partial cluster")?,
            })
        })
    }

    fn centroid(&self, phrases: &[&str]) -> Result<Vec<f32>> {
        let texts: Vec<String> = phrases.iter().map(|p| p.to_string()).collect();
        let vectors = self.encoder.encode_batch(&texts)?;
        anyhow::ensure!(!vectors.is_empty(), "empty pattern cluster");

        let dim = vectors[0].len();
        let mut mean = vec![0.0_f32; dim];
        for vector in &vectors {
            for (m, v) in mean.iter_mut().zip(vector) {
                *m += v;
            }
        }
        let n = vectors.len() as f32;
        for m in &mut mean {
            *m /= n;
        }
        Ok(mean)
    }

    pub fn analyze(&self, content: &str) -> Result<SemanticVerdict> {
        let centroids = self.centroids()?;
        let query = self.encoder.encode_one(content)?;

        let positive = similarity01(&query, &centroids.positive);
        let negative = similarity01(&query, &centroids.negative);
        let partial = similarity01(&query, &centroids.partial);

        let (sentiment, best, second) = rank(positive, negative, partial);
        let sentiment = if best >= MIN_SIMILARITY {
            sentiment
        } else {
            FeedbackSentiment::Neutral
        };
        // Confidence blends the winner's absolute similarity with its margin
        // over the runner-up.
        let confidence = bounded(
            "semantic_confidence",
            (0.5 * best + 0.5 * (best - second)).clamp(0.0, 1.0),
            0.0,
            1.0,
        );

        Ok(SemanticVerdict {
            sentiment,
            confidence,
            positive_similarity: positive,
            negative_similarity: negative,
            partial_similarity: partial,
        })
    }
}

fn rank(positive: f32, negative: f32, partial: f32) -> (FeedbackSentiment, f32, f32) {
    let mut scored = [
        (FeedbackSentiment::Positive, positive),
        (FeedbackSentiment::Negative, negative),
        (FeedbackSentiment::Partial, partial),
    ];
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    (scored[0].0, scored[0].1, scored[1].1)
}

/// Cosine similarity clamped to [0, 1]; negative similarity carries no signal
/// for sentence embeddings of short feedback phrases.
fn similarity01(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

/// Coarse technical-domain tag for the semantic metadata block.
pub fn detect_domain(content: &str) -> String {
    static DOMAINS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    let domains = DOMAINS.get_or_init(|| {
        let build = |p: &str| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("built-in domain pattern is valid")
        };
        vec![
            ("rust", build(r"\b(rust|cargo|borrow checker|crate)\b")),
            ("python", build(r"\b(python|pip|django|pytest)\b")),
            ("javascript", build(r"\b(javascript|typescript|node|npm|react)\b")),
            ("infrastructure", build(r"\b(docker|kubernetes|terraform|deploy)\b")),
            ("database", build(r"\b(sql|postgres|sqlite|database|migration)\b")),
        ]
    });
    domains
        .iter()
        .find(|(_, re)| re.is_match(content))
        .map(|(name, _)| name.to_string())
        .unwrap_or_default()
}
