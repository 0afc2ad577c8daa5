use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use engram_config::AppConfig;
use engram_embedding::{FastEncoder, TextEncoder};
use engram_pipeline::{BackfillEngine, SyncRunner};
use engram_search::{Recency, SearchEngine, SearchMode, SearchRequest, ValidationPreference};
use engram_store::ConversationStore;

#[derive(Debug, Parser)]
#[command(
    name = "engram",
    version,
    about = "Semantic index over your Claude Code conversation history"
)]
struct Cli {
    /// Path to config.toml (defaults to ~/.engram/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Index transcripts into the vector store, then back-fill sessions.
    Sync {
        /// Re-scan every transcript instead of only recently modified ones.
        #[arg(long)]
        full: bool,
    },
    /// Unified semantic search over indexed conversations.
    Search {
        query: String,
        #[arg(long, value_enum, default_value = "semantic")]
        mode: CliSearchMode,
        /// Required with --mode by-topic.
        #[arg(long)]
        topic: Option<String>,
        /// Project name for the affinity boost.
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        code_only: bool,
        #[arg(long)]
        validated_only: bool,
        #[arg(long, value_enum)]
        recency: Option<CliRecency>,
        /// Weight validated/refuted outcomes into the ranking.
        #[arg(long)]
        validation_boost: bool,
        /// Attach surrounding conversation turns to each hit.
        #[arg(long)]
        chains: bool,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Re-run chain/relationship back-fill.
    Backfill {
        /// Only this session; all stored sessions when omitted.
        #[arg(long)]
        session: Option<String>,
    },
    /// Store statistics.
    Stats,
    /// Remove entries violating identity/content invariants.
    Cleanup {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSearchMode {
    Semantic,
    ValidatedOnly,
    FailedOnly,
    RecentOnly,
    ByTopic,
}

impl From<CliSearchMode> for SearchMode {
    fn from(mode: CliSearchMode) -> Self {
        match mode {
            CliSearchMode::Semantic => SearchMode::Semantic,
            CliSearchMode::ValidatedOnly => SearchMode::ValidatedOnly,
            CliSearchMode::FailedOnly => SearchMode::FailedOnly,
            CliSearchMode::RecentOnly => SearchMode::RecentOnly,
            CliSearchMode::ByTopic => SearchMode::ByTopic,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliRecency {
    Today,
    ThisWeek,
    ThisMonth,
    ThisQuarter,
}

impl From<CliRecency> for Recency {
    fn from(recency: CliRecency) -> Self {
        match recency {
            CliRecency::Today => Recency::Today,
            CliRecency::ThisWeek => Recency::ThisWeek,
            CliRecency::ThisMonth => Recency::ThisMonth,
            CliRecency::ThisQuarter => Recency::ThisQuarter,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    let encoder: Arc<dyn TextEncoder> = Arc::new(FastEncoder::new(
        &config.embedding.model_id,
        config.embedding.cache_dir.as_ref().map(PathBuf::from),
    )?);
    if encoder.dimension() != config.embedding.dimension {
        bail!(
            "model {} produces {}-dim vectors but config expects {}",
            config.embedding.model_id,
            encoder.dimension(),
            config.embedding.dimension
        );
    }
    let store = Arc::new(ConversationStore::open(
        &config.store.store_path,
        Arc::clone(&encoder),
        config.store.batch_size,
    )?);

    match cli.command {
        Commands::Sync { full } => {
            let runner = SyncRunner::new(config, Arc::clone(&store), encoder);
            let report = if full {
                runner.full_sync().await?
            } else {
                runner.incremental_sync().await?
            };
            println!(
                "synced {} entries from {} files ({} records seen, {} skipped, {} already indexed)",
                report.entries_upserted,
                report.files_scanned,
                report.records_seen,
                report.records_skipped.values().sum::<usize>(),
                report.already_indexed,
            );
            println!(
                "back-filled {} sessions, {} feedback pairs, chain coverage {:.1}%",
                report.sessions_backfilled,
                report.feedback_pairs,
                report.chain_coverage * 100.0,
            );
        }
        Commands::Search {
            query,
            mode,
            topic,
            project,
            code_only,
            validated_only,
            recency,
            validation_boost,
            chains,
            limit,
        } => {
            let engine = SearchEngine::new(Arc::clone(&store), &config);
            let request = SearchRequest {
                query_text: query,
                mode: mode.into(),
                topic_focus: topic,
                project_context: project,
                include_code_only: code_only,
                validation_preference: if validated_only {
                    ValidationPreference::ValidatedOnly
                } else {
                    ValidationPreference::Neutral
                },
                recency: recency.map(Into::into),
                use_validation_boost: validation_boost,
                include_context_chains: chains,
                limit,
                ..SearchRequest::default()
            };
            let response = engine.search(&request)?;
            if response.zero_hits {
                println!("no matches");
                return Ok(());
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for (rank, hit) in response.hits.iter().enumerate() {
                writeln!(
                    out,
                    "{:>2}. [{:.3}] {} ({} · {} · {})",
                    rank + 1,
                    hit.final_score,
                    hit.entry.id,
                    hit.entry.project_name,
                    hit.entry.role.as_str(),
                    hit.entry.timestamp,
                )?;
                writeln!(out, "    {}", preview(&hit.entry.content, 160))?;
                if let Some(chain) = &hit.context_chain {
                    for before in &chain.before {
                        writeln!(out, "      ↑ {}", preview(&before.content, 80))?;
                    }
                    for after in &chain.after {
                        writeln!(out, "      ↓ {}", preview(&after.content, 80))?;
                    }
                }
            }
        }
        Commands::Backfill { session } => {
            let engine = BackfillEngine::new(Arc::clone(&store), config.backfill.window_size);
            // Without an explicit target, only sessions quiet for the
            // configured interval are treated as complete.
            let sessions = match session {
                Some(id) => vec![id],
                None => {
                    let cutoff = chrono::Utc::now().timestamp()
                        - (config.backfill.session_quiet_minutes as i64) * 60;
                    store.sessions_quiet_since(cutoff)?
                }
            };
            let mut pairs = 0usize;
            for session_id in &sessions {
                let report = engine.backfill_session(session_id)?;
                pairs += report.feedback_pairs;
            }
            println!("back-filled {} sessions, {pairs} feedback pairs", sessions.len());
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("entries:             {}", stats.total);
            println!("  user turns:        {}", stats.users);
            println!("  assistant turns:   {}", stats.assistants);
            println!("sessions:            {}", stats.sessions);
            println!("solution attempts:   {}", stats.solution_attempts);
            println!("  validated:         {}", stats.validated_solutions);
            println!("  refuted:           {}", stats.refuted_attempts);
            println!("back-filled entries: {}", stats.backfill_processed);
            println!("with primary topic:  {}", stats.with_primary_topic);
        }
        Commands::Cleanup { yes } => {
            if !yes {
                bail!("cleanup deletes entries; re-run with --yes to confirm");
            }
            let deleted = store.delete_corrupt()?;
            println!("removed {deleted} corrupt entries");
        }
    }
    Ok(())
}

fn preview(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max {
        flat
    } else {
        let mut cut = max;
        while !flat.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &flat[..cut])
    }
}
