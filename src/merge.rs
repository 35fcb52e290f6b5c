//! Cross-batch merge planning: compare resolved incoming signals against
//! the persisted rows for the same subjects and decide, per signal,
//! whether to insert, fully overwrite, or overwrite provenance only.
//!
//! This module only *decides*; it performs no storage I/O. The ingestion
//! pipeline executes the plan and surfaces per-row failures.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::fingerprint::fingerprint;
use crate::signal::{RawSignal, SignalSource, StoredSignal, TraceEntry};
use crate::sources::outranks;

/// Union of two provenance traces, deduplicated by source. Entries from
/// `base` come first; on a duplicate source the first-seen entry wins.
pub fn merge_traces(base: &[TraceEntry], incoming: &[TraceEntry]) -> Vec<TraceEntry> {
    let mut out: Vec<TraceEntry> = Vec::with_capacity(base.len() + incoming.len());
    for entry in base.iter().chain(incoming) {
        if !out.iter().any(|e| e.source == entry.source) {
            out.push(entry.clone());
        }
    }
    out
}

/// Append a `{source, now}` entry unless the trace already names that
/// source.
pub fn append_once(
    mut trace: Vec<TraceEntry>,
    source: SignalSource,
    now: DateTime<Utc>,
) -> Vec<TraceEntry> {
    if !trace.iter().any(|e| e.source == source) {
        trace.push(TraceEntry {
            source,
            ingested_at: now,
        });
    }
    trace
}

/// Replacement content for a full overwrite.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPatch {
    pub title: String,
    pub description: Option<String>,
    pub relevance_score: f64,
    pub detected_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

/// One queued update against an existing row. `content: None` means
/// provenance-only: the trace and timestamp change, the content does not.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalUpdate {
    pub id: Uuid,
    pub content: Option<ContentPatch>,
    pub source_trace: Vec<TraceEntry>,
    pub updated_at: DateTime<Utc>,
}

/// The decided actions for one batch. Every incoming signal appears in
/// exactly one of `inserts` or `updates`; nothing is silently dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergePlan {
    pub inserts: Vec<StoredSignal>,
    pub updates: Vec<SignalUpdate>,
    pub conflicts: usize,
}

/// Plan inserts/updates for `resolved` against the persisted rows fetched
/// for the batch's subjects.
///
/// A fingerprint miss queues an insert whose trace gains a `{source, now}`
/// entry unless already present. A hit counts one conflict and merges the
/// traces; the existing row's winner is taken from its *pre-merge* trace,
/// and only a strictly higher-ranked batch source replaces content. Rank
/// ties keep the stored content.
pub fn plan_merge(
    resolved: Vec<RawSignal>,
    existing: &[StoredSignal],
    source: SignalSource,
    now: DateTime<Utc>,
) -> MergePlan {
    let by_fp: HashMap<String, &StoredSignal> = existing
        .iter()
        .map(|row| (fingerprint(&row.title, row.subject_id.as_deref()), row))
        .collect();

    let mut plan = MergePlan::default();

    for sig in resolved {
        let fp = fingerprint(&sig.title, sig.subject_id.as_deref());
        match by_fp.get(&fp) {
            None => {
                plan.inserts.push(StoredSignal {
                    id: Uuid::new_v4(),
                    title: sig.title,
                    description: sig.description,
                    relevance_score: sig.relevance_score,
                    detected_at: sig.detected_at.unwrap_or(now),
                    subject_id: sig.subject_id,
                    source_trace: append_once(sig.source_trace, source, now),
                    metadata: sig.metadata,
                    updated_at: now,
                });
            }
            Some(row) => {
                plan.conflicts += 1;
                let merged = merge_traces(&row.source_trace, &sig.source_trace);
                // winner judged against the pre-merge stored trace
                let content = if outranks(source, &row.source_trace) {
                    Some(ContentPatch {
                        title: sig.title,
                        description: sig.description,
                        relevance_score: sig.relevance_score,
                        detected_at: sig.detected_at.unwrap_or(now),
                        metadata: sig.metadata,
                    })
                } else {
                    None
                };
                plan.updates.push(SignalUpdate {
                    id: row.id,
                    content,
                    source_trace: append_once(merged, source, now),
                    updated_at: now,
                });
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: SignalSource, now: DateTime<Utc>) -> TraceEntry {
        TraceEntry {
            source,
            ingested_at: now,
        }
    }

    fn raw(title: &str, subject: Option<&str>, score: f64) -> RawSignal {
        RawSignal {
            title: title.to_string(),
            description: Some("detail".into()),
            relevance_score: score,
            detected_at: Some(Utc::now()),
            subject_id: subject.map(str::to_string),
            source_trace: Vec::new(),
            metadata: Default::default(),
        }
    }

    fn stored(title: &str, subject: Option<&str>, score: f64, trace: Vec<TraceEntry>) -> StoredSignal {
        let now = Utc::now();
        StoredSignal {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: Some("original detail".into()),
            relevance_score: score,
            detected_at: now,
            subject_id: subject.map(str::to_string),
            source_trace: trace,
            metadata: Default::default(),
            updated_at: now,
        }
    }

    #[test]
    fn trace_merge_is_set_like_per_source() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::hours(1);
        let base = vec![entry(SignalSource::IpoWatch, earlier)];
        let incoming = vec![
            entry(SignalSource::IpoWatch, now),
            entry(SignalSource::Regulatory, now),
        ];
        let merged = merge_traces(&base, &incoming);
        assert_eq!(merged.len(), 2);
        // first-seen wins: the base IPO_WATCH timestamp survives
        assert_eq!(merged[0].source, SignalSource::IpoWatch);
        assert_eq!(merged[0].ingested_at, earlier);
        assert_eq!(merged[1].source, SignalSource::Regulatory);
    }

    #[test]
    fn append_once_skips_known_source() {
        let now = Utc::now();
        let trace = vec![entry(SignalSource::MarketFeed, now)];
        assert_eq!(append_once(trace.clone(), SignalSource::MarketFeed, now).len(), 1);
        assert_eq!(append_once(trace, SignalSource::Regulatory, now).len(), 2);
    }

    #[test]
    fn miss_queues_insert_with_stamped_trace() {
        let now = Utc::now();
        let plan = plan_merge(
            vec![raw("Acme IPO filing", Some("P1"), 0.9)],
            &[],
            SignalSource::IpoWatch,
            now,
        );
        assert_eq!(plan.conflicts, 0);
        assert_eq!(plan.updates.len(), 0);
        assert_eq!(plan.inserts.len(), 1);
        let row = &plan.inserts[0];
        assert_eq!(row.source_trace.len(), 1);
        assert_eq!(row.source_trace[0].source, SignalSource::IpoWatch);
        assert_eq!(row.updated_at, now);
    }

    #[test]
    fn higher_ranked_source_overwrites_content() {
        let now = Utc::now();
        let existing = stored(
            "Acme IPO filing",
            Some("P1"),
            0.9,
            vec![entry(SignalSource::IpoWatch, now)],
        );
        let plan = plan_merge(
            vec![raw("Acme Corp... acme ipo filing", Some("P1"), 0.6)],
            std::slice::from_ref(&existing),
            SignalSource::Regulatory,
            now,
        );
        // different fingerprint above would be a bug in the test itself
        let plan2 = plan_merge(
            vec![raw("Acme IPO Filing!!", Some("P1"), 0.6)],
            std::slice::from_ref(&existing),
            SignalSource::Regulatory,
            now,
        );
        assert_eq!(plan.inserts.len(), 1); // sanity: non-matching title inserts
        assert_eq!(plan2.conflicts, 1);
        let update = &plan2.updates[0];
        assert_eq!(update.id, existing.id);
        let patch = update.content.as_ref().expect("full-content update");
        assert_eq!(patch.relevance_score, 0.6);
        assert_eq!(patch.title, "Acme IPO Filing!!");
        let sources: Vec<_> = update.source_trace.iter().map(|e| e.source).collect();
        assert_eq!(sources, [SignalSource::IpoWatch, SignalSource::Regulatory]);
    }

    #[test]
    fn lower_ranked_source_updates_provenance_only() {
        let now = Utc::now();
        let existing = stored(
            "Acme IPO filing",
            Some("P1"),
            0.9,
            vec![entry(SignalSource::Regulatory, now)],
        );
        let plan = plan_merge(
            vec![raw("acme ipo filing", Some("P1"), 0.1)],
            std::slice::from_ref(&existing),
            SignalSource::MarketFeed,
            now,
        );
        assert_eq!(plan.conflicts, 1);
        let update = &plan.updates[0];
        assert!(update.content.is_none(), "content must stay untouched");
        let sources: Vec<_> = update.source_trace.iter().map(|e| e.source).collect();
        assert_eq!(sources, [SignalSource::Regulatory, SignalSource::MarketFeed]);
    }

    #[test]
    fn rank_tie_keeps_existing_content() {
        let now = Utc::now();
        let existing = stored(
            "Acme IPO filing",
            Some("P1"),
            0.9,
            vec![entry(SignalSource::IpoWatch, now)],
        );
        let plan = plan_merge(
            vec![raw("acme ipo filing", Some("P1"), 0.2)],
            std::slice::from_ref(&existing),
            SignalSource::IpoWatch,
            now,
        );
        assert_eq!(plan.conflicts, 1);
        assert!(plan.updates[0].content.is_none());
    }

    #[test]
    fn every_incoming_signal_yields_one_action() {
        let now = Utc::now();
        let existing = stored(
            "Known event",
            Some("P1"),
            0.5,
            vec![entry(SignalSource::MarketFeed, now)],
        );
        let plan = plan_merge(
            vec![
                raw("Known event", Some("P1"), 0.7),
                raw("Brand new event", Some("P2"), 0.4),
                raw("Unattached rumor", None, 0.3),
            ],
            std::slice::from_ref(&existing),
            SignalSource::CuratedIntel,
            now,
        );
        assert_eq!(plan.inserts.len() + plan.updates.len(), 3);
        assert_eq!(plan.conflicts, 1);
    }
}
