// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod classify;
pub mod fingerprint;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod resolve;
pub mod signal;
pub mod sources;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::pipeline::{ingest_batch, IngestOutcome};
pub use crate::signal::{Priority, RawSignal, SignalSource, StoredSignal, TimelineWindow};
