//! # Signal Domain Types
//!
//! Wire and storage shapes for liquidity signals: the raw payload accepted
//! by the ingest endpoint, the persisted row, the provenance trace, and the
//! derived classification enums (priority band, timeline window).
//!
//! Priority and timeline are *derived* at read time from `relevance_score`
//! and `detected_at`; they are never persisted, so threshold changes apply
//! retroactively to the whole store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A data source reporting liquidity signals, ordered by trustworthiness.
/// Unknown values are rejected at deserialization, so every variant has a
/// rank (see [`crate::sources::rank`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    #[serde(rename = "REGULATORY")]
    Regulatory,
    #[serde(rename = "CURATED_INTEL")]
    CuratedIntel,
    #[serde(rename = "IPO_WATCH")]
    IpoWatch,
    #[serde(rename = "MARKET_FEED")]
    MarketFeed,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Regulatory => "REGULATORY",
            SignalSource::CuratedIntel => "CURATED_INTEL",
            SignalSource::IpoWatch => "IPO_WATCH",
            SignalSource::MarketFeed => "MARKET_FEED",
        }
    }

    /// Parse the wire spelling used in query-string filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REGULATORY" => Some(SignalSource::Regulatory),
            "CURATED_INTEL" => Some(SignalSource::CuratedIntel),
            "IPO_WATCH" => Some(SignalSource::IpoWatch),
            "MARKET_FEED" => Some(SignalSource::MarketFeed),
            _ => None,
        }
    }
}

/// One provenance entry: which source reported the signal and when.
/// Traces are kept insertion-ordered and deduplicated by source on merge
/// (first occurrence wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub source: SignalSource,
    pub ingested_at: DateTime<Utc>,
}

fn default_relevance() -> f64 {
    0.5
}

/// A signal as submitted to the ingest endpoint, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignal {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Continuous relevance in `[0,1]`; absent means "middling" (0.5).
    #[serde(default = "default_relevance")]
    pub relevance_score: f64,
    /// When the underlying event was detected. Absent means "now", filled
    /// in by the intra-batch resolver with the ingestion timestamp.
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
    /// Prospect/client the signal concerns; unattached signals are allowed.
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub source_trace: Vec<TraceEntry>,
    /// Opaque passthrough; never interpreted by the pipeline.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A persisted signal row. Created on first sighting of a fingerprint,
/// mutated in place on later sightings, never deleted by this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSignal {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub relevance_score: f64,
    pub detected_at: DateTime<Utc>,
    pub subject_id: Option<String>,
    pub source_trace: Vec<TraceEntry>,
    pub metadata: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Priority band derived from `relevance_score` at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Priority::Low),
            "MEDIUM" => Some(Priority::Medium),
            "HIGH" => Some(Priority::High),
            "CRITICAL" => Some(Priority::Critical),
            _ => None,
        }
    }
}

/// Coarse recency classification derived from `detected_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineWindow {
    #[serde(rename = "30_DAY")]
    ThirtyDay,
    #[serde(rename = "60_DAY")]
    SixtyDay,
    #[serde(rename = "90_DAY")]
    NinetyDay,
    #[serde(rename = "ALL")]
    All,
}

impl TimelineWindow {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "30_DAY" => Some(TimelineWindow::ThirtyDay),
            "60_DAY" => Some(TimelineWindow::SixtyDay),
            "90_DAY" => Some(TimelineWindow::NinetyDay),
            "ALL" => Some(TimelineWindow::All),
            _ => None,
        }
    }

    /// Window length in days; `All` has no cutoff.
    pub fn days(&self) -> Option<i64> {
        match self {
            TimelineWindow::ThirtyDay => Some(30),
            TimelineWindow::SixtyDay => Some(60),
            TimelineWindow::NinetyDay => Some(90),
            TimelineWindow::All => None,
        }
    }
}

/// Summary of one accepted batch; `(batch_id, source)` is unique and closes
/// the idempotency window for retries of the identical pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub batch_id: String,
    pub source: SignalSource,
    pub processed: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}
