//! # Read-side Query Builder
//!
//! Translates the dashboard's filter state (free-text search, timeline
//! window, priority bands, sources, sort, pagination) into a structured
//! query the repository can execute. The translation is pure; evaluation
//! against a row lives here too so the in-memory store and tests share
//! one definition of "matches".

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;

use crate::classify::score_band;
use crate::signal::{Priority, SignalSource, StoredSignal, TimelineWindow};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Raw query-string parameters for `GET /intelligence/signals`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalFilterParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
    /// Comma-joined priority bands, e.g. `CRITICAL,HIGH`.
    #[serde(default)]
    pub priority: Option<String>,
    /// Comma-joined sources, e.g. `REGULATORY,IPO_WATCH`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    DetectedAt,
    RelevanceScore,
}

/// A fully resolved query: every filter reduced to clauses the store can
/// apply mechanically.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalQuery {
    /// AND-of-prefix-matches tokens; empty means no text restriction.
    pub search_tokens: Vec<String>,
    /// `detected_at >= cutoff`; `None` means no timeline restriction.
    pub detected_after: Option<DateTime<Utc>>,
    /// ORed `[min, max)` relevance ranges; empty means no restriction.
    pub score_bands: Vec<(f64, f64)>,
    /// ORed membership checks against the provenance trace.
    pub sources: Vec<SignalSource>,
    pub sort: SortField,
    pub descending: bool,
    pub page: usize,
    pub limit: usize,
}

impl SignalQuery {
    /// Resolve filter parameters into clauses. Unrecognized priority or
    /// source tokens are dropped rather than rejected; an unrecognized
    /// timeline falls back to `ALL`.
    pub fn from_params(params: &SignalFilterParams, now: DateTime<Utc>) -> Self {
        let search_tokens = tokenize(params.q.as_deref().unwrap_or(""));

        let timeline = params
            .timeline
            .as_deref()
            .and_then(TimelineWindow::parse)
            .unwrap_or(TimelineWindow::All);
        let detected_after = timeline.days().map(|d| now - Duration::days(d));

        let score_bands = split_csv(params.priority.as_deref())
            .filter_map(Priority::parse)
            .map(score_band)
            .collect();

        let sources = split_csv(params.source.as_deref())
            .filter_map(SignalSource::parse)
            .collect();

        let sort = match params.sort_by.as_deref() {
            Some("priority") | Some("confidence") => SortField::RelevanceScore,
            _ => SortField::DetectedAt,
        };
        let descending = !matches!(params.sort_order.as_deref(), Some("asc"));

        let page = params.page.unwrap_or(1).max(1) as usize;
        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT as i64)
            .clamp(1, MAX_PAGE_LIMIT as i64) as usize;

        SignalQuery {
            search_tokens,
            detected_after,
            score_bands,
            sources,
            sort,
            descending,
            page,
            limit,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.limit
    }

    /// Whether a stored row satisfies every clause.
    pub fn matches(&self, row: &StoredSignal) -> bool {
        if let Some(cutoff) = self.detected_after {
            if row.detected_at < cutoff {
                return false;
            }
        }
        if !self.score_bands.is_empty()
            && !self
                .score_bands
                .iter()
                .any(|(min, max)| row.relevance_score >= *min && row.relevance_score < *max)
        {
            return false;
        }
        if !self.sources.is_empty()
            && !row
                .source_trace
                .iter()
                .any(|e| self.sources.contains(&e.source))
        {
            return false;
        }
        if !self.search_tokens.is_empty() {
            let haystack = match &row.description {
                Some(desc) => format!("{} {}", row.title, desc),
                None => row.title.clone(),
            };
            let words: Vec<String> = tokenize(&haystack);
            if !self
                .search_tokens
                .iter()
                .all(|tok| words.iter().any(|w| w.starts_with(tok.as_str())))
            {
                return false;
            }
        }
        true
    }

    /// Total order over rows for the resolved sort; ties fall back to the
    /// other field so pagination is stable.
    pub fn compare(&self, a: &StoredSignal, b: &StoredSignal) -> std::cmp::Ordering {
        let ord = match self.sort {
            SortField::DetectedAt => a
                .detected_at
                .cmp(&b.detected_at)
                .then(a.relevance_score.total_cmp(&b.relevance_score)),
            SortField::RelevanceScore => a
                .relevance_score
                .total_cmp(&b.relevance_score)
                .then(a.detected_at.cmp(&b.detected_at)),
        };
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }
}

/// Lowercase the input and keep alphanumeric/underscore/hyphen runs as
/// tokens. Whitespace-only input yields no tokens, i.e. no search clause.
pub fn tokenize(q: &str) -> Vec<String> {
    static RE_TOKEN: OnceCell<Regex> = OnceCell::new();
    let re = RE_TOKEN.get_or_init(|| Regex::new(r"[a-z0-9_-]+").unwrap());
    re.find_iter(&q.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn split_csv(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::TraceEntry;
    use serde_json::Map;
    use uuid::Uuid;

    fn params() -> SignalFilterParams {
        SignalFilterParams::default()
    }

    fn row(title: &str, score: f64, days_ago: i64, sources: &[SignalSource]) -> StoredSignal {
        let now = Utc::now();
        StoredSignal {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            relevance_score: score,
            detected_at: now - Duration::days(days_ago),
            subject_id: None,
            source_trace: sources
                .iter()
                .map(|s| TraceEntry {
                    source: *s,
                    ingested_at: now,
                })
                .collect(),
            metadata: Map::new(),
            updated_at: now,
        }
    }

    #[test]
    fn empty_or_whitespace_search_has_no_restriction() {
        let now = Utc::now();
        let mut p = params();
        p.q = Some("   \t ".into());
        let q = SignalQuery::from_params(&p, now);
        assert!(q.search_tokens.is_empty());
        assert!(q.matches(&row("anything at all", 0.1, 0, &[])));
    }

    #[test]
    fn search_is_and_of_prefix_matches() {
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                q: Some("acme filing".into()),
                ..params()
            },
            Utc::now(),
        );
        assert!(q.matches(&row("Acme Corp IPO filings soar", 0.5, 0, &[])));
        // both tokens must match somewhere
        assert!(!q.matches(&row("Acme Corp earnings call", 0.5, 0, &[])));
        // prefix, not substring
        assert!(!q.matches(&row("Bacme refiling", 0.5, 0, &[])));
    }

    #[test]
    fn timeline_maps_to_absolute_cutoff() {
        let now = Utc::now();
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                timeline: Some("30_DAY".into()),
                ..params()
            },
            now,
        );
        assert_eq!(q.detected_after, Some(now - Duration::days(30)));
        assert!(q.matches(&row("x", 0.5, 29, &[])));
        assert!(!q.matches(&row("x", 0.5, 31, &[])));

        let all = SignalQuery::from_params(
            &SignalFilterParams {
                timeline: Some("ALL".into()),
                ..params()
            },
            now,
        );
        assert_eq!(all.detected_after, None);
    }

    #[test]
    fn priority_bands_are_ored() {
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                priority: Some("CRITICAL,LOW".into()),
                ..params()
            },
            Utc::now(),
        );
        assert_eq!(q.score_bands.len(), 2);
        assert!(q.matches(&row("x", 0.9, 0, &[]))); // critical band
        assert!(q.matches(&row("x", 0.1, 0, &[]))); // low band
        assert!(!q.matches(&row("x", 0.6, 0, &[]))); // medium, excluded
    }

    #[test]
    fn source_filter_checks_trace_membership() {
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                source: Some("REGULATORY".into()),
                ..params()
            },
            Utc::now(),
        );
        assert!(q.matches(&row(
            "x",
            0.5,
            0,
            &[SignalSource::MarketFeed, SignalSource::Regulatory]
        )));
        assert!(!q.matches(&row("x", 0.5, 0, &[SignalSource::MarketFeed])));
    }

    #[test]
    fn unknown_filter_tokens_are_dropped() {
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                priority: Some("URGENT,HIGH".into()),
                source: Some("BLOOMBERG".into()),
                timeline: Some("FORTNIGHT".into()),
                ..params()
            },
            Utc::now(),
        );
        assert_eq!(q.score_bands.len(), 1);
        assert!(q.sources.is_empty());
        assert_eq!(q.detected_after, None);
    }

    #[test]
    fn pagination_is_clamped() {
        let q = SignalQuery::from_params(
            &SignalFilterParams {
                page: Some(-2),
                limit: Some(5000),
                ..params()
            },
            Utc::now(),
        );
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, MAX_PAGE_LIMIT);
        assert_eq!(q.offset(), 0);

        let q2 = SignalQuery::from_params(
            &SignalFilterParams {
                page: Some(3),
                limit: Some(0),
                ..params()
            },
            Utc::now(),
        );
        assert_eq!(q2.limit, 1);
        assert_eq!(q2.offset(), 2);
    }

    #[test]
    fn sort_resolves_logical_fields() {
        let by_conf = SignalQuery::from_params(
            &SignalFilterParams {
                sort_by: Some("confidence".into()),
                sort_order: Some("asc".into()),
                ..params()
            },
            Utc::now(),
        );
        assert_eq!(by_conf.sort, SortField::RelevanceScore);
        assert!(!by_conf.descending);

        let default = SignalQuery::from_params(&params(), Utc::now());
        assert_eq!(default.sort, SortField::DetectedAt);
        assert!(default.descending);

        let a = row("a", 0.2, 0, &[]);
        let b = row("b", 0.8, 0, &[]);
        assert_eq!(by_conf.compare(&a, &b), std::cmp::Ordering::Less);
    }
}
