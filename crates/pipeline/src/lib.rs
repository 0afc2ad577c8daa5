pub mod backfill;
pub mod monitor;
pub mod sync;

pub use backfill::{BackfillEngine, SessionBackfillReport};
pub use monitor::{ProcessingMonitor, RecordOutcome, SystemicExtractionFailure, WindowRates};
pub use sync::{SyncError, SyncPhase, SyncReport, SyncRunner};
