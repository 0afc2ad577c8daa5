//! Full and incremental synchronisation runs.
//!
//! One runner instance owns a run: files stream through the reader, each
//! record is normalised, enhanced and buffered, batches flush to the store
//! with bounded retries, and completed sessions are handed to the back-fill
//! engine. The quality monitor observes every record and a trip halts the
//! run before the current batch is written — an INFO success line is only
//! ever emitted together with the window rates that justify it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use engram_config::AppConfig;
use engram_core::Entry;
use engram_embedding::TextEncoder;
use engram_enhance::{
    EnhancementProcessor, EnhancementStats, ProcessingContext, apply_feedback_to_solution,
};
use engram_ingest::{RecordContext, TranscriptReader, normalize};
use engram_store::{ConversationStore, StoreError};

use crate::backfill::BackfillEngine;
use crate::monitor::{ProcessingMonitor, RecordOutcome, SystemicExtractionFailure, WindowRates};

/// Store write retries on transient errors.
const MAX_WRITE_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

const META_LAST_SYNC: &str = "last_sync_unix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Scanning,
    Extracting,
    Enhancing,
    Upserting,
    BackFilling,
    Done,
}

/// Log the state-machine transition once per phase change.
fn advance(phase: &mut SyncPhase, next: SyncPhase, run_id: Uuid) {
    if *phase != next {
        info!(run_id = %run_id, from = ?*phase, to = ?next, stage = "phase", "sync phase transition");
        *phase = next;
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Systemic(#[from] SystemicExtractionFailure),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sync task join failure: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub incremental: bool,
    pub files_scanned: usize,
    pub records_seen: usize,
    pub malformed_lines: usize,
    pub entries_upserted: usize,
    pub already_indexed: usize,
    /// Skip-reason code → count.
    pub records_skipped: BTreeMap<String, usize>,
    pub enhancement: EnhancementStats,
    pub sessions_backfilled: usize,
    pub feedback_pairs: usize,
    /// Interior entries fully linked / interior entries, across all sessions.
    pub chain_coverage: f32,
    pub window: WindowRates,
}

pub struct SyncRunner {
    config: AppConfig,
    store: Arc<ConversationStore>,
    processor: EnhancementProcessor,
}

impl SyncRunner {
    pub fn new(config: AppConfig, store: Arc<ConversationStore>, encoder: Arc<dyn TextEncoder>) -> Self {
        let processor = EnhancementProcessor::from_config(&config, encoder);
        Self {
            config,
            store,
            processor,
        }
    }

    /// Index every transcript under the projects root, then back-fill every
    /// touched session.
    pub async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        let reader = TranscriptReader::new(&self.config.ingest.projects_root);
        self.run(reader, false).await
    }

    /// Index only transcripts modified since the last recorded sync, skipping
    /// content the store has already seen for each session.
    pub async fn incremental_sync(&self) -> Result<SyncReport, SyncError> {
        let mut reader = TranscriptReader::new(&self.config.ingest.projects_root);
        if let Some(raw) = self.store.meta_get(META_LAST_SYNC)? {
            if let Ok(unix) = raw.parse::<i64>() {
                let since = std::time::UNIX_EPOCH + Duration::from_secs(unix.max(0) as u64);
                reader = reader.modified_since(since);
            }
        }
        self.run(reader, true).await
    }

    async fn run(&self, reader: TranscriptReader, incremental: bool) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            run_id: Uuid::new_v4(),
            incremental,
            ..SyncReport::default()
        };
        let mut phase = SyncPhase::Scanning;
        let mut monitor = ProcessingMonitor::new(self.config.quality.clone());
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut known_hashes: HashMap<String, HashSet<String>> = HashMap::new();
        let mut touched_sessions: BTreeSet<String> = BTreeSet::new();

        let files = reader.transcript_files();
        report.files_scanned = files.len();
        info!(
            run_id = %report.run_id,
            files = files.len(),
            incremental,
            stage = "scan",
            "sync run starting"
        );

        for path in &files {
            advance(&mut phase, SyncPhase::Extracting, report.run_id);
            let records = match reader.read_records(path) {
                Ok(records) => records,
                Err(err) => {
                    warn!(file_path = %path.display(), error = %err, "skipping unreadable transcript");
                    continue;
                }
            };
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let mut sequence = 0usize;
            let mut previous: Option<Entry> = None;
            let mut batch: Vec<Entry> = Vec::with_capacity(self.config.store.batch_size);

            for line in records {
                report.records_seen += 1;
                let raw = match line.result {
                    Ok(raw) => raw,
                    Err(err) => {
                        report.malformed_lines += 1;
                        warn!(
                            file_path = %file_name,
                            line = line.line_no,
                            error = %err,
                            "malformed transcript line skipped"
                        );
                        monitor.observe(RecordOutcome::malformed());
                        monitor.check()?;
                        continue;
                    }
                };

                let ctx = RecordContext {
                    file_name: &file_name,
                    sequence,
                };
                sequence += 1;

                let mut entry = match normalize(ctx, &raw) {
                    Ok(entry) => entry,
                    Err(reason) => {
                        *report.records_skipped.entry(reason.code().to_string()).or_default() += 1;
                        monitor.observe(RecordOutcome::skipped(reason));
                        monitor.check()?;
                        continue;
                    }
                };

                let duplicate = !seen_ids.insert(entry.id.clone());
                monitor.observe(RecordOutcome::accepted(&entry, duplicate));
                monitor.check()?;
                if duplicate {
                    // The breaker trips on any duplicate after warm-up; a
                    // duplicate seen before that must still never be written.
                    warn!(entry_id = %entry.id, "duplicate id within run, entry dropped");
                    continue;
                }

                if incremental {
                    let hashes = match known_hashes.entry(entry.session_id.clone()) {
                        std::collections::hash_map::Entry::Occupied(o) => o.into_mut(),
                        std::collections::hash_map::Entry::Vacant(v) => {
                            v.insert(self.store.session_hashes(&entry.session_id)?)
                        }
                    };
                    if hashes.contains(&entry.content_hash) {
                        report.already_indexed += 1;
                        previous = Some(entry);
                        continue;
                    }
                    hashes.insert(entry.content_hash.clone());
                }

                advance(&mut phase, SyncPhase::Enhancing, report.run_id);
                self.processor.enhance(
                    &mut entry,
                    &ProcessingContext {
                        previous: previous.as_ref(),
                    },
                );

                // Tentative validation of the immediately preceding solution,
                // if it is still in the unflushed batch. Back-fill recomputes
                // the definitive pairing either way.
                if entry.is_feedback_to_solution {
                    if let Some(last) = batch.last_mut() {
                        if last.id == entry.related_solution_id {
                            apply_feedback_to_solution(&entry, last);
                        }
                    }
                }

                touched_sessions.insert(entry.session_id.clone());
                previous = Some(entry.clone());
                batch.push(entry);

                if batch.len() >= self.config.store.batch_size {
                    advance(&mut phase, SyncPhase::Upserting, report.run_id);
                    report.entries_upserted += self.flush(&mut batch).await?;
                    self.log_batch_quality(&report, &monitor);
                }
            }

            // File boundary: flush the session's tail.
            if !batch.is_empty() {
                advance(&mut phase, SyncPhase::Upserting, report.run_id);
                report.entries_upserted += self.flush(&mut batch).await?;
                self.log_batch_quality(&report, &monitor);
            }
        }

        advance(&mut phase, SyncPhase::BackFilling, report.run_id);
        let backfiller = BackfillEngine::new(Arc::clone(&self.store), self.config.backfill.window_size);
        let mut interior_linked = 0usize;
        let mut interior_total = 0usize;
        for session_id in &touched_sessions {
            match backfiller.backfill_session(session_id) {
                Ok(session_report) => {
                    report.sessions_backfilled += 1;
                    report.feedback_pairs += session_report.feedback_pairs;
                    interior_linked += session_report.interior_linked;
                    interior_total += session_report.interior_total;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, stage = "backfill", "session back-fill failed");
                }
            }
        }
        report.chain_coverage = if interior_total == 0 {
            1.0
        } else {
            interior_linked as f32 / interior_total as f32
        };

        self.store.meta_set(META_LAST_SYNC, &Utc::now().timestamp().to_string())?;

        advance(&mut phase, SyncPhase::Done, report.run_id);
        report.enhancement = self.processor.stats();
        report.window = monitor.rates();
        info!(
            run_id = %report.run_id,
            files = report.files_scanned,
            records = report.records_seen,
            upserted = report.entries_upserted,
            skipped = report.records_skipped.values().sum::<usize>(),
            sessions = report.sessions_backfilled,
            chain_coverage = report.chain_coverage,
            mean_quality = report.window.mean_quality,
            empty_content_rate = report.window.empty_content_rate,
            stage = "done",
            "sync run complete"
        );
        Ok(report)
    }

    /// Flush the batch with bounded retries. Transient store errors back off
    /// exponentially; structural errors escalate immediately.
    async fn flush(&self, batch: &mut Vec<Entry>) -> Result<usize, SyncError> {
        let entries = std::mem::take(batch);
        let mut attempt = 0u32;
        loop {
            let store = Arc::clone(&self.store);
            let to_write = entries.clone();
            let result =
                tokio::task::spawn_blocking(move || store.upsert_many(&to_write))
                    .await
                    .map_err(|e| SyncError::Join(e.to_string()))?;
            match result {
                Ok(written) => return Ok(written),
                Err(err) if err.is_transient() && attempt < MAX_WRITE_RETRIES => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        stage = "upsert",
                        "transient store failure, retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Per-batch success line, always with its quality context.
    fn log_batch_quality(&self, report: &SyncReport, monitor: &ProcessingMonitor) {
        let rates = monitor.rates();
        info!(
            run_id = %report.run_id,
            upserted = report.entries_upserted,
            window_records = rates.records,
            empty_content_rate = rates.empty_content_rate,
            unknown_project_rate = rates.unknown_project_rate,
            mean_quality = rates.mean_quality,
            stage = "upsert",
            "batch acknowledged"
        );
    }
}
