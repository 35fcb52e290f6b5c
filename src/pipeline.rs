//! Ingestion pipeline: replay guard → intra-batch resolve → cross-batch
//! merge plan → store writes → audit record.
//!
//! The pure steps live in `resolve`/`merge`; this module owns the I/O
//! boundary. Storage failures never raise across the component boundary —
//! per-row failures are aggregated into the outcome's `errors` list, and
//! an audit-write failure is logged without invalidating an ingest whose
//! content writes already committed.

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::merge::plan_merge;
use crate::resolve::resolve_batch;
use crate::signal::{AuditRecord, RawSignal, SignalSource};
use crate::store::{AuditRepo, SignalRepo};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("intel_ingest_batches_total", "Ingest batches accepted.");
        describe_counter!(
            "intel_ingest_replays_total",
            "Batches skipped by the idempotency guard."
        );
        describe_counter!(
            "intel_ingest_processed_total",
            "Signal rows successfully inserted or updated."
        );
        describe_counter!(
            "intel_ingest_conflicts_total",
            "Fingerprint collisions resolved (intra-batch + cross-batch)."
        );
        describe_counter!(
            "intel_ingest_write_errors_total",
            "Individual store writes that failed."
        );
        describe_gauge!(
            "intel_ingest_last_run_ts",
            "Unix ts when an ingest batch last ran."
        );
    });
}

/// Result of one ingestion call, mirrored onto the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The batch/source pair was already audited; nothing was processed.
    pub replayed: bool,
    /// Insert/update operations that actually succeeded.
    pub processed: usize,
    /// Collapses + store fingerprint matches for this batch.
    pub conflicts: usize,
    /// One entry per failed store operation.
    pub errors: Vec<String>,
}

impl IngestOutcome {
    fn replay() -> Self {
        IngestOutcome {
            replayed: true,
            processed: 0,
            conflicts: 0,
            errors: Vec::new(),
        }
    }
}

/// Short anonymized handle for a signal title, for logs. Raw titles name
/// clients and never appear in log output.
fn anon_title(title: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(title.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Process one batch end to end.
///
/// Fails only when a pre-processing read (replay check, existing-signal
/// fetch) fails; write failures are reported through the outcome instead.
/// Retrying the identical `(batch_id, source)` pair after success is a
/// no-op by contract.
pub async fn ingest_batch(
    signals: Vec<RawSignal>,
    source: SignalSource,
    batch_id: &str,
    signal_repo: &dyn SignalRepo,
    audit_repo: &dyn AuditRepo,
) -> anyhow::Result<IngestOutcome> {
    ensure_metrics_described();

    if audit_repo.find(batch_id, source).await?.is_some() {
        tracing::info!(
            target: "ingest",
            batch_id,
            source = source.as_str(),
            "replayed batch, skipping"
        );
        counter!("intel_ingest_replays_total").increment(1);
        return Ok(IngestOutcome::replay());
    }

    let now = Utc::now();
    let batch_len = signals.len();
    let resolution = resolve_batch(signals, source, now);

    // fetch only the rows this batch can collide with
    let mut subject_ids: Vec<String> = Vec::new();
    let mut any_unassigned = false;
    for sig in &resolution.resolved {
        match &sig.subject_id {
            Some(id) if !subject_ids.contains(id) => subject_ids.push(id.clone()),
            Some(_) => {}
            None => any_unassigned = true,
        }
    }
    let existing = signal_repo
        .find_by_subjects(&subject_ids, any_unassigned)
        .await?;

    let plan = plan_merge(resolution.resolved, &existing, source, now);
    let conflicts = resolution.conflicts + plan.conflicts;

    let mut processed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for row in plan.inserts {
        let handle = anon_title(&row.title);
        match signal_repo.insert(row).await {
            Ok(()) => processed += 1,
            Err(e) => {
                tracing::warn!(target: "ingest", %handle, error = ?e, "insert failed");
                errors.push(format!("insert {handle}: {e:#}"));
            }
        }
    }
    for update in plan.updates {
        match signal_repo.update_by_id(&update).await {
            Ok(()) => processed += 1,
            Err(e) => {
                tracing::warn!(target: "ingest", id = %update.id, error = ?e, "update failed");
                errors.push(format!("update {}: {e:#}", update.id));
            }
        }
    }

    // Audit closes the idempotency window. A failure here reopens it; a
    // re-submitted batch re-merges convergently, so log and move on.
    let audit = AuditRecord {
        batch_id: batch_id.to_string(),
        source,
        processed,
        conflicts,
        errors: errors.clone(),
        recorded_at: Utc::now(),
    };
    if let Err(e) = audit_repo.record(audit).await {
        tracing::warn!(
            target: "ingest",
            batch_id,
            source = source.as_str(),
            error = ?e,
            "audit write failed; idempotency window stays open"
        );
    }

    counter!("intel_ingest_batches_total").increment(1);
    counter!("intel_ingest_processed_total").increment(processed as u64);
    counter!("intel_ingest_conflicts_total").increment(conflicts as u64);
    counter!("intel_ingest_write_errors_total").increment(errors.len() as u64);
    gauge!("intel_ingest_last_run_ts").set(now.timestamp() as f64);

    tracing::info!(
        target: "ingest",
        batch_id,
        source = source.as_str(),
        received = batch_len,
        processed,
        conflicts,
        failed = errors.len(),
        "batch ingested"
    );

    Ok(IngestOutcome {
        replayed: false,
        processed,
        conflicts,
        errors,
    })
}
