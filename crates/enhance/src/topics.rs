//! Keyword/regex topic detection.
//!
//! Each topic carries a pattern list; a topic's score is the fraction of its
//! patterns matching the content, so scores are naturally in [0, 1] and
//! independent of lexicon size. Topics above the configured threshold land in
//! `detected_topics`; the argmax becomes `primary_topic`.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use tracing::debug;

const DEFAULT_TOPICS: &[(&str, &[&str])] = &[
    (
        "debugging",
        &[
            r"\berror\b",
            r"\bstack trace\b",
            r"\bpanic\b",
            r"\bcrash",
            r"\bbug\b",
            r"\btraceback\b",
            r"\bexception\b",
            r"\bbacktrace\b",
            r"\bfail(s|ed|ing|ure)?\b",
        ],
    ),
    (
        "testing",
        &[
            r"\btests?\b",
            r"\bassert",
            r"\bcoverage\b",
            r"\bunit test",
            r"\bintegration test",
            r"\bmock",
            r"\bfixture",
        ],
    ),
    (
        "deployment",
        &[
            r"\bdeploy",
            r"\bdocker\b",
            r"\bkubernetes\b",
            r"\bci\b",
            r"\bpipeline\b",
            r"\brelease\b",
            r"\bcontainer",
        ],
    ),
    (
        "database",
        &[
            r"\bsql\b",
            r"\bsqlite\b",
            r"\bpostgres",
            r"\bmigration",
            r"\bquer(y|ies)\b",
            r"\bschema\b",
            r"\bdatabase\b",
        ],
    ),
    (
        "frontend",
        &[
            r"\breact\b",
            r"\bcss\b",
            r"\bhtml\b",
            r"\bcomponent",
            r"\bdom\b",
            r"\bbrowser\b",
            r"\blayout\b",
        ],
    ),
    (
        "performance",
        &[
            r"\bslow\b",
            r"\blatency\b",
            r"\boptimi[sz]",
            r"\bprofil(e|er|ing)\b",
            r"\bbenchmark",
            r"\bmemory usage\b",
            r"\bthroughput\b",
        ],
    ),
    (
        "authentication",
        &[
            r"\bauth(entication|ori[sz]ation)?\b",
            r"\blogin\b",
            r"\btoken\b",
            r"\boauth\b",
            r"\bpassword\b",
            r"\bjwt\b",
            r"\bsession cookie\b",
        ],
    ),
    (
        "configuration",
        &[
            r"\bconfig",
            r"\bsettings\b",
            r"\benvironment variable",
            r"\btoml\b",
            r"\byaml\b",
            r"\bdotenv\b",
            r"\bflag\b",
        ],
    ),
    (
        "build_tooling",
        &[
            r"\bcargo\b",
            r"\bcompil(e|er|ation)\b",
            r"\bbuild\b",
            r"\blinker\b",
            r"\bdependenc(y|ies)\b",
            r"\bnpm\b",
            r"\bmakefile\b",
        ],
    ),
    (
        "version_control",
        &[
            r"\bgit\b",
            r"\bcommit",
            r"\bmerge\b",
            r"\brebase\b",
            r"\bbranch\b",
            r"\bpull request\b",
        ],
    ),
];

#[derive(Debug, Clone, Default)]
pub struct TopicScores {
    pub detected: BTreeMap<String, f32>,
    pub primary: String,
    pub confidence: f32,
}

pub struct TopicDetector {
    topics: Vec<(String, Vec<Regex>)>,
    threshold: f32,
}

impl TopicDetector {
    /// Built-in topic lexicon with the configured score threshold.
    pub fn with_defaults(threshold: f32) -> Self {
        let topics = DEFAULT_TOPICS
            .iter()
            .map(|(name, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(true)
                            .build()
                            .expect("built-in topic pattern is valid")
                    })
                    .collect();
                (name.to_string(), compiled)
            })
            .collect();
        Self { topics, threshold }
    }

    pub fn detect(&self, content: &str) -> TopicScores {
        let mut scores = TopicScores::default();
        for (name, patterns) in &self.topics {
            let hits = patterns.iter().filter(|p| p.is_match(content)).count();
            if hits == 0 {
                continue;
            }
            let score = hits as f32 / patterns.len() as f32;
            if score >= self.threshold {
                scores.detected.insert(name.clone(), score);
                if score > scores.confidence {
                    scores.confidence = score;
                    scores.primary = name.clone();
                }
            }
        }
        debug!(
            primary = %scores.primary,
            confidence = scores.confidence,
            detected = scores.detected.len(),
            "topic detection"
        );
        scores
    }
}
