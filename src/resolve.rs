//! Intra-batch conflict resolution: collapse duplicate signals arriving in
//! a single batch from one source, before the batch is compared against
//! the persisted store.
//!
//! Implemented as a fold over the input list producing a new list, keyed
//! by fingerprint. No I/O, no shared state; the caller supplies `now` so
//! behavior is deterministic under test.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::fingerprint::fingerprint;
use crate::merge::merge_traces;
use crate::signal::{RawSignal, SignalSource, TraceEntry};
use crate::sources::outranks;

/// Outcome of collapsing one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResolution {
    /// At most one signal per distinct fingerprint, in first-seen order.
    pub resolved: Vec<RawSignal>,
    /// Number of collapses (not comparisons).
    pub conflicts: usize,
}

/// Collapse same-fingerprint duplicates within one batch.
///
/// First sighting of a fingerprint keeps the signal as-is, attaching a
/// single-entry `{source, now}` trace when it carries none, and filling a
/// missing `detected_at` with the ingestion time. A repeat sighting
/// increments the conflict counter and merges its trace into the stored
/// entry; its content replaces the stored content only when the batch
/// source strictly outranks the stored entry's current best-ranked trace
/// source. On a rank tie the earlier content wins.
pub fn resolve_batch(
    signals: Vec<RawSignal>,
    source: SignalSource,
    now: DateTime<Utc>,
) -> BatchResolution {
    let mut order: Vec<String> = Vec::new();
    let mut by_fp: HashMap<String, RawSignal> = HashMap::new();
    let mut conflicts = 0usize;

    for mut sig in signals {
        if sig.detected_at.is_none() {
            sig.detected_at = Some(now);
        }
        let fp = fingerprint(&sig.title, sig.subject_id.as_deref());

        match by_fp.entry(fp) {
            Entry::Vacant(slot) => {
                if sig.source_trace.is_empty() {
                    sig.source_trace.push(TraceEntry {
                        source,
                        ingested_at: now,
                    });
                }
                order.push(slot.key().clone());
                slot.insert(sig);
            }
            Entry::Occupied(mut slot) => {
                conflicts += 1;
                let kept = slot.get_mut();
                let merged = merge_traces(&kept.source_trace, &sig.source_trace);
                if outranks(source, &merged) {
                    *kept = RawSignal {
                        source_trace: merged,
                        ..sig
                    };
                } else {
                    kept.source_trace = merged;
                }
            }
        }
    }

    let resolved = order
        .iter()
        .filter_map(|fp| by_fp.remove(fp))
        .collect::<Vec<_>>();

    BatchResolution { resolved, conflicts }
}
