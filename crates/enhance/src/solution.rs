//! Solution-attempt detection, categorisation and quality scoring.
//!
//! The quality formula and its weights are a compatibility surface: scores
//! are persisted, so changing any constant here requires a version bump and
//! a reindex of the store.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use engram_core::{Role, SolutionCategory, bounded};

// Quality score weights. base + length + code + explanation + success − hedge,
// clamped to [0, 1].
const W_BASE: f32 = 0.15;
const W_LENGTH: f32 = 0.20;
const W_CODE: f32 = 0.25;
const W_EXPLANATION: f32 = 0.20;
const W_SUCCESS: f32 = 0.20;
const HEDGE_PENALTY: f32 = 0.15;

#[derive(Debug, Clone, Default)]
pub struct SolutionSignals {
    pub is_attempt: bool,
    pub category: SolutionCategory,
    pub quality: f32,
    pub has_success_markers: bool,
    pub has_quality_indicators: bool,
}

fn regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("built-in solution pattern is valid")
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex(r"\b(try|run|add|change|set|update|install|replace|remove|apply|fix|edit|rename)\b")
    })
}

fn config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex(r"\b(config|settings|\.env\b|toml|yaml|environment variable|feature flag)")
    })
}

fn diagnostic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"\b(check|inspect|look at|print|log out|debug|verify|confirm)\b"))
}

fn suggestion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"\b(consider|suggest|instead|alternative|approach|you could|i would)\b"))
}

fn explanation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"\b(because|therefore|so that|since|the reason|this means)\b"))
}

fn success_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"✅|\b(works|fixed|resolved|passes|should now)\b"))
}

fn hedge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| regex(r"\b(might|maybe|not sure|possibly|perhaps|i think|unclear)\b"))
}

/// Classify one entry's content. Only assistant entries can be solution
/// attempts; user entries always come back with the zeroed default.
pub fn classify_solution(role: Role, content: &str, has_code: bool) -> SolutionSignals {
    if role != Role::Assistant {
        return SolutionSignals::default();
    }

    let directive = directive_re().is_match(content);
    let is_attempt = has_code || directive;
    if !is_attempt {
        return SolutionSignals::default();
    }

    // Deterministic category priority: concrete code beats configuration,
    // configuration beats diagnostics, diagnostics beat soft suggestions.
    let category = if has_code {
        SolutionCategory::CodeFix
    } else if config_re().is_match(content) {
        SolutionCategory::ConfigChange
    } else if diagnostic_re().is_match(content) {
        SolutionCategory::Diagnostic
    } else if suggestion_re().is_match(content) {
        SolutionCategory::ApproachSuggestion
    } else {
        SolutionCategory::Other
    };

    let has_quality_indicators = explanation_re().is_match(content);
    let has_success_markers = success_re().is_match(content);

    let length_factor = match content.len() {
        0..=79 => 0.25,
        80..=399 => 0.6,
        400..=1499 => 1.0,
        _ => 0.8,
    };
    let mut quality = W_BASE + W_LENGTH * length_factor;
    if has_code {
        quality += W_CODE;
    }
    if has_quality_indicators {
        quality += W_EXPLANATION;
    }
    if has_success_markers {
        quality += W_SUCCESS;
    }
    if hedge_re().is_match(content) {
        quality -= HEDGE_PENALTY;
    }

    SolutionSignals {
        is_attempt,
        category,
        quality: bounded("solution_quality_score", quality.clamp(0.0, 1.0), 0.0, 1.0),
        has_success_markers,
        has_quality_indicators,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_entries_are_never_attempts() {
        let signals = classify_solution(Role::User, "try running cargo clean", false);
        assert!(!signals.is_attempt);
        assert_eq!(signals.category, SolutionCategory::None);
    }

    #[test]
    fn code_block_wins_category_priority() {
        let content = "Update the config: try this\n```rust\nfn main() {}\n```";
        let signals = classify_solution(Role::Assistant, content, true);
        assert!(signals.is_attempt);
        assert_eq!(signals.category, SolutionCategory::CodeFix);
    }

    #[test]
    fn config_language_without_code_is_config_change() {
        let signals = classify_solution(
            Role::Assistant,
            "Set the environment variable in your settings and restart",
            false,
        );
        assert!(signals.is_attempt);
        assert_eq!(signals.category, SolutionCategory::ConfigChange);
    }

    #[test]
    fn diagnostic_verbs_rank_below_config() {
        let signals =
            classify_solution(Role::Assistant, "Check the logs and verify the port first", false);
        assert_eq!(signals.category, SolutionCategory::Diagnostic);
    }

    #[test]
    fn quality_rewards_code_and_explanation() {
        let plain = classify_solution(Role::Assistant, "try restarting", false);
        let rich = classify_solution(
            Role::Assistant,
            "Try pinning the dependency because the resolver picks the wrong version. \
             This works after a clean build:\n```toml\nserde = \"=1.0.200\"\n```",
            true,
        );
        assert!(rich.quality > plain.quality);
        assert!(rich.has_quality_indicators);
        assert!(rich.has_success_markers);
    }

    #[test]
    fn hedging_lowers_quality() {
        let confident =
            classify_solution(Role::Assistant, "Run cargo update to fix the lockfile", false);
        let hedged = classify_solution(
            Role::Assistant,
            "Maybe run cargo update, not sure it will fix the lockfile",
            false,
        );
        assert!(hedged.quality < confident.quality);
    }

    #[test]
    fn quality_is_always_bounded() {
        let signals = classify_solution(
            Role::Assistant,
            "✅ fixed and works because the reason is clear, therefore resolved. \
             Apply this:\n```rust\nfn f() {}\n```",
            true,
        );
        assert!((0.0..=1.0).contains(&signals.quality));
    }
}
