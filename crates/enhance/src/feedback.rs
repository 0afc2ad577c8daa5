//! Lexicon-based feedback sentiment for user replies to solution attempts.
//!
//! Curated phrase lists are scored 3/2/1 (strong/moderate/subtle) per hit.
//! `strength` is the dominant class's score normalised against a single
//! strong hit, capped at 1.0; `confidence` is the dominant class's share of
//! all matched weight. Both are persisted, so the lexicons and weights are a
//! compatibility surface.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use engram_core::{FeedbackSentiment, bounded};

const POSITIVE_STRONG: &[&str] = &[
    "that fixed it",
    "fixed it",
    "works perfectly",
    "works now",
    "that did it",
    "solved",
    "exactly what i needed",
    "perfect",
];
const POSITIVE_MODERATE: &[&str] = &[
    "thanks",
    "thank you",
    "that worked",
    "works",
    "great",
    "that helped",
    "looks good",
    "much better",
];
const POSITIVE_SUBTLE: &[&str] = &["better now", "seems right", "good", "nice", "yep"];

const NEGATIVE_STRONG: &[&str] = &[
    "still broken",
    "doesn't work",
    "does not work",
    "didn't work",
    "same error",
    "still failing",
    "made it worse",
    "not working",
];
const NEGATIVE_MODERATE: &[&str] = &[
    "still seeing",
    "still getting",
    "no luck",
    "that's wrong",
    "incorrect",
    "still fails",
];
const NEGATIVE_SUBTLE: &[&str] = &["not quite", "still not", "doesn't seem", "hmm"];

const PARTIAL: &[&str] = &[
    "partially",
    "almost",
    "closer",
    "some progress",
    "that helped but",
    "better but",
    "one issue remains",
    "works but",
];

/// Score ceiling: one strong hit. Sums above this saturate `strength` at 1.0.
const STRONG_WEIGHT: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSignal {
    pub sentiment: FeedbackSentiment,
    pub strength: f32,
    pub confidence: f32,
}

impl Default for PatternSignal {
    fn default() -> Self {
        Self {
            sentiment: FeedbackSentiment::Neutral,
            strength: 0.0,
            confidence: 0.0,
        }
    }
}

struct Lexicon {
    positive: Vec<(Regex, f32)>,
    negative: Vec<(Regex, f32)>,
    partial: Vec<(Regex, f32)>,
}

fn phrase_regex(phrase: &str) -> Regex {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(phrase)))
        .case_insensitive(true)
        .build()
        .expect("built-in feedback phrase is valid")
}

fn lexicon() -> &'static Lexicon {
    static LEXICON: OnceLock<Lexicon> = OnceLock::new();
    LEXICON.get_or_init(|| {
        let weighted = |phrases: &[&str], weight: f32| {
            phrases
                .iter()
                .map(|p| (phrase_regex(p), weight))
                .collect::<Vec<_>>()
        };
        let mut positive = weighted(POSITIVE_STRONG, 3.0);
        positive.extend(weighted(POSITIVE_MODERATE, 2.0));
        positive.extend(weighted(POSITIVE_SUBTLE, 1.0));

        let mut negative = weighted(NEGATIVE_STRONG, 3.0);
        negative.extend(weighted(NEGATIVE_MODERATE, 2.0));
        negative.extend(weighted(NEGATIVE_SUBTLE, 1.0));

        Lexicon {
            positive,
            negative,
            partial: weighted(PARTIAL, 2.0),
        }
    })
}

fn class_score(patterns: &[(Regex, f32)], content: &str) -> f32 {
    patterns
        .iter()
        .filter(|(re, _)| re.is_match(content))
        .map(|(_, w)| w)
        .sum()
}

pub fn analyze_feedback(content: &str) -> PatternSignal {
    let lex = lexicon();
    let pos = class_score(&lex.positive, content);
    let neg = class_score(&lex.negative, content);
    let partial = class_score(&lex.partial, content);
    let total = pos + neg + partial;
    if total == 0.0 {
        return PatternSignal::default();
    }

    // Partial phrases dominate when they match at least as strongly as either
    // pole; an exact positive/negative tie is also treated as partial.
    let (sentiment, dominant) = if partial > 0.0 && partial >= pos && partial >= neg {
        (FeedbackSentiment::Partial, partial)
    } else if pos > neg {
        (FeedbackSentiment::Positive, pos)
    } else if neg > pos {
        (FeedbackSentiment::Negative, neg)
    } else {
        (FeedbackSentiment::Partial, pos)
    };

    PatternSignal {
        sentiment,
        strength: bounded("validation_strength", (dominant / STRONG_WEIGHT).min(1.0), 0.0, 1.0),
        confidence: bounded("feedback_confidence", dominant / total, 0.0, 1.0),
    }
}
