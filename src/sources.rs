//! # Source Trust Ranking
//!
//! A fixed, strictly ordered ranking of data-source trustworthiness:
//! regulatory filings outrank the curated intelligence feed, which
//! outranks IPO-watch feeds, which outrank general market feeds.
//!
//! Ranks exist only for `>` comparisons during conflict resolution.
//! They are never summed, averaged, or otherwise treated as magnitudes.

use crate::signal::{SignalSource, TraceEntry};

/// Trust rank for a source; higher wins conflicts.
pub fn rank(source: SignalSource) -> u8 {
    match source {
        SignalSource::Regulatory => 4,
        SignalSource::CuratedIntel => 3,
        SignalSource::IpoWatch => 2,
        SignalSource::MarketFeed => 1,
    }
}

/// The highest-ranked source present in a provenance trace, i.e. the
/// trace's current "winner". `None` for an empty trace.
pub fn best_ranked(trace: &[TraceEntry]) -> Option<SignalSource> {
    trace.iter().map(|e| e.source).max_by_key(|s| rank(*s))
}

/// Whether `incoming` strictly outranks the winner of `trace`. An empty
/// trace has no winner, so any incoming source outranks it.
pub fn outranks(incoming: SignalSource, trace: &[TraceEntry]) -> bool {
    match best_ranked(trace) {
        Some(best) => rank(incoming) > rank(best),
        None => true,
    }
}
