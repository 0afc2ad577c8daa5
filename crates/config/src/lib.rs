use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Named enhancement capability toggles for the metadata pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enhancement {
    TopicDetection,
    SolutionDetection,
    SemanticFeedback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root directory scanned for `**/*.jsonl` transcripts.
    pub projects_root: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            projects_root: home.join(".claude").join("projects").display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store_path: String,
    /// Rows per write batch; kept well below SQLite's bound-parameter limit.
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_path: "./vector_store".to_string(),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Identity of the sentence-embedding model. Changing it invalidates every
    /// stored vector; the store refuses to open until rebuilt.
    pub model_id: String,
    pub dimension: usize,
    /// Optional on-disk cache for downloaded model weights.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "all-minilm-l6-v2".to_string(),
            dimension: 384,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub enabled: BTreeSet<Enhancement>,
    /// Minimum normalised topic score for a topic to be recorded.
    pub topic_threshold: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: BTreeSet::from([
                Enhancement::TopicDetection,
                Enhancement::SolutionDetection,
                Enhancement::SemanticFeedback,
            ]),
            topic_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// How many entries after a solution attempt are scanned for feedback.
    pub window_size: usize,
    /// A session file untouched for this long is considered complete.
    pub session_quiet_minutes: u64,
    /// Surrounding entries fetched per side when search expands context chains.
    pub chain_context_size: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            window_size: 3,
            session_quiet_minutes: 10,
            chain_context_size: 2,
        }
    }
}

/// Circuit-breaker thresholds for the rolling ingestion quality window.
/// These are rates over the window, not absolute counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub empty_content_rate_max: f32,
    pub unknown_project_rate_max: f32,
    pub duplicate_id_rate_max: f32,
    pub min_quality_score: f32,
    /// Rolling window size in records.
    pub window_size: usize,
    /// Records observed before the window rates are enforced.
    pub warmup_records: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            empty_content_rate_max: 0.30,
            unknown_project_rate_max: 0.50,
            duplicate_id_rate_max: 0.0,
            min_quality_score: 0.5,
            window_size: 50,
            warmup_records: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Candidates fetched per requested result before reranking.
    pub over_fetch_factor: usize,
    /// Hard cap on candidates fetched from the store.
    pub over_fetch_ceiling: usize,
    /// Validation boost slope: ×(1 + alpha · validation_strength).
    pub validation_alpha: f32,
    /// Freshness boost slope: ×(1 + beta · decay(age)).
    pub freshness_beta: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
            over_fetch_factor: 4,
            over_fetch_ceiling: 200,
            validation_alpha: 0.5,
            freshness_beta: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub enhance: EnhanceConfig,
    pub backfill: BackfillConfig,
    pub quality: QualityThresholds,
    pub search: SearchConfig,
    pub telemetry: TelemetryConfig,
    /// Project name → technology tokens, used for the shared-stack affinity
    /// boost during search reranking.
    pub project_tech_stacks: BTreeMap<String, BTreeSet<String>>,
}

impl AppConfig {
    /// Conventional config location: `<home>/.engram/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".engram")
            .join("config.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn enhancement_enabled(&self, capability: Enhancement) -> bool {
        self.enhance.enabled.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.quality.window_size, 50);
        assert!((config.quality.empty_content_rate_max - 0.30).abs() < f32::EPSILON);
        assert_eq!(config.backfill.window_size, 3);
        assert_eq!(config.search.default_limit, 5);
        assert!(config.enhancement_enabled(Enhancement::TopicDetection));
    }

    #[test]
    fn roundtrips_through_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.store.batch_size = 42;
        config
            .project_tech_stacks
            .insert("projA".into(), BTreeSet::from(["rust".to_string(), "sqlite".to_string()]));
        config.save_to(&path)?;

        let loaded = AppConfig::load_from(&path)?;
        assert_eq!(loaded.store.batch_size, 42);
        assert!(loaded.project_tech_stacks["projA"].contains("rust"));
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let loaded = AppConfig::load_from("/nonexistent/engram/config.toml")?;
        assert_eq!(loaded.store.batch_size, AppConfig::default().store.batch_size);
        Ok(())
    }
}
