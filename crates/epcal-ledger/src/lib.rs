//! epcal calibration ledger
//!
//! Durable, append-only history of calibration iterations for one run
//! directory: model snapshots, metric files, notes and an iteration log
//! mirrored as JSONL and CSV.

pub mod error;
pub mod fsio;
pub mod layout;
pub mod lock;
pub mod log;
pub mod record;
pub mod store;
pub mod summary;

pub use error::{LedgerError, LedgerResult};
pub use layout::{slugify, LedgerLayout};
pub use lock::{LedgerLock, DEFAULT_LOCK_TIMEOUT};
pub use log::CSV_COLUMNS;
pub use record::{IterationDraft, IterationRecord, MetricDelta, ParameterChange, RecordOptions};
pub use store::{CalibrationLedger, RunMeta};
pub use summary::{IterationBrief, LedgerSummary};
