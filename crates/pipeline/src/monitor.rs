//! Rolling-window ingestion quality guard.
//!
//! Silent progress on corrupt data is the failure mode this system must
//! never repeat: the monitor watches the last N record outcomes and trips a
//! [`SystemicExtractionFailure`] the moment any configured threshold is
//! exceeded. The orchestrator halts on a trip; the failure is never caught
//! and continued internally.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::warn;

use engram_config::QualityThresholds;
use engram_core::Entry;
use engram_ingest::SkipReason;

/// Quality signals for one observed record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOutcome {
    pub empty_content: bool,
    pub unknown_project: bool,
    pub duplicate_id: bool,
    /// Per-record quality in [0, 1]; the window mean feeds the breaker.
    pub quality: f32,
}

impl RecordOutcome {
    pub fn accepted(entry: &Entry, duplicate_id: bool) -> Self {
        let unknown_project = entry.project_name == "unknown";
        Self {
            empty_content: false,
            unknown_project,
            duplicate_id,
            quality: if duplicate_id {
                0.0
            } else if unknown_project {
                0.7
            } else {
                1.0
            },
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            empty_content: reason == SkipReason::EmptyContent,
            unknown_project: false,
            duplicate_id: false,
            quality: if reason == SkipReason::EmptyContent { 0.0 } else { 0.3 },
        }
    }

    pub fn malformed() -> Self {
        Self {
            empty_content: true,
            unknown_project: false,
            duplicate_id: false,
            quality: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowRates {
    pub records: usize,
    pub empty_content_rate: f32,
    pub unknown_project_rate: f32,
    pub duplicate_id_rate: f32,
    pub mean_quality: f32,
}

#[derive(Debug, Clone, Error)]
#[error(
    "systemic extraction failure: {alert} \
     (window: {records} records, empty {empty:.0}%, unknown-project {unknown:.0}%, \
     duplicate-id {duplicate:.2}%, mean quality {quality:.2})",
    records = .rates.records,
    empty = .rates.empty_content_rate * 100.0,
    unknown = .rates.unknown_project_rate * 100.0,
    duplicate = .rates.duplicate_id_rate * 100.0,
    quality = .rates.mean_quality
)]
pub struct SystemicExtractionFailure {
    pub alert: String,
    pub rates: WindowRates,
}

pub struct ProcessingMonitor {
    window: VecDeque<RecordOutcome>,
    thresholds: QualityThresholds,
    observed: usize,
}

impl ProcessingMonitor {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            window: VecDeque::with_capacity(thresholds.window_size),
            thresholds,
            observed: 0,
        }
    }

    pub fn observe(&mut self, outcome: RecordOutcome) {
        if self.window.len() == self.thresholds.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
        self.observed += 1;
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn rates(&self) -> WindowRates {
        let records = self.window.len();
        if records == 0 {
            return WindowRates::default();
        }
        let n = records as f32;
        WindowRates {
            records,
            empty_content_rate: self.window.iter().filter(|o| o.empty_content).count() as f32 / n,
            unknown_project_rate: self.window.iter().filter(|o| o.unknown_project).count() as f32
                / n,
            duplicate_id_rate: self.window.iter().filter(|o| o.duplicate_id).count() as f32 / n,
            mean_quality: self.window.iter().map(|o| o.quality).sum::<f32>() / n,
        }
    }

    /// Enforce the thresholds once warm-up has passed. Checked after every
    /// observed record so a trip halts within one window of the corruption.
    pub fn check(&self) -> Result<(), SystemicExtractionFailure> {
        if self.observed < self.thresholds.warmup_records {
            return Ok(());
        }
        let rates = self.rates();
        let alert = if rates.empty_content_rate > self.thresholds.empty_content_rate_max {
            Some("empty-content rate above threshold")
        } else if rates.unknown_project_rate > self.thresholds.unknown_project_rate_max {
            Some("unknown-project rate above threshold")
        } else if rates.duplicate_id_rate > self.thresholds.duplicate_id_rate_max {
            Some("duplicate-id rate above threshold")
        } else if rates.mean_quality < self.thresholds.min_quality_score {
            Some("mean quality below threshold")
        } else {
            None
        };

        match alert {
            None => Ok(()),
            Some(alert) => {
                warn!(
                    alert_type = "circuit_breaker",
                    records = rates.records,
                    empty_content_rate = rates.empty_content_rate,
                    unknown_project_rate = rates.unknown_project_rate,
                    duplicate_id_rate = rates.duplicate_id_rate,
                    mean_quality = rates.mean_quality,
                    "{alert}"
                );
                Err(SystemicExtractionFailure {
                    alert: alert.to_string(),
                    rates,
                })
            }
        }
    }
}
