//! HTTP surface: ingest entrypoint, read-side signal queries, and the
//! per-subject aggregation used by the dashboard summary panels.
//!
//! Every `/intelligence/*` route requires a bearer token. The token is
//! forwarded by the dashboard and verified upstream; here we only refuse
//! requests that arrive without one, before any signal logic runs. Which
//! subjects a caller may see is likewise resolved upstream and arrives as
//! an explicit subject-id list.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::classify::{derive_priority, timeline_bucket};
use crate::pipeline;
use crate::query::{SignalFilterParams, SignalQuery};
use crate::signal::{Priority, RawSignal, SignalSource, StoredSignal, TimelineWindow};
use crate::store::{AuditRepo, InMemoryAuditRepo, InMemorySignalRepo, SignalRepo};

/// Cap on rows fetched for the by-subject aggregation.
const SUBJECT_RECENT_CAP: usize = 500;
/// Top signals echoed per subject summary.
const TOP_SIGNALS_PER_SUBJECT: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub signals: Arc<dyn SignalRepo>,
    pub audit: Arc<dyn AuditRepo>,
}

impl AppState {
    pub fn new(signals: Arc<dyn SignalRepo>, audit: Arc<dyn AuditRepo>) -> Self {
        Self { signals, audit }
    }

    /// State backed by the in-memory repositories, as used by the binary
    /// and the HTTP tests.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemorySignalRepo::new()),
            Arc::new(InMemoryAuditRepo::new()),
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/intelligence/ingest", post(ingest))
        .route("/intelligence/signals", get(list_signals))
        .route("/intelligence/signals/by-subject", get(signals_by_subject))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Extract a non-empty bearer token. No verification happens here.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "error": "unauthorized" })),
    )
        .into_response()
}

fn bad_request(msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "success": false, "error": msg })),
    )
        .into_response()
}

fn internal_error(target: &str, e: anyhow::Error) -> Response {
    tracing::error!(target: "api", route = target, error = ?e, "storage call failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "error": format!("{e:#}") })),
    )
        .into_response()
}

// ---- ingest ----

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    #[serde(default)]
    signals: Vec<RawSignal>,
    source: SignalSource,
    #[serde(default)]
    batch_id: Option<String>,
}

#[derive(serde::Serialize)]
struct IngestResponse {
    success: bool,
    processed: usize,
    conflicts: usize,
    errors: Vec<String>,
}

async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return unauthorized();
    }
    if req.signals.is_empty() {
        return bad_request("signals must be a non-empty array");
    }

    // An omitted batch id gets a fresh one, which disables replay
    // protection for this call; retrying callers must send their own.
    let batch_id = match req.batch_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };

    match pipeline::ingest_batch(
        req.signals,
        req.source,
        &batch_id,
        state.signals.as_ref(),
        state.audit.as_ref(),
    )
    .await
    {
        Ok(outcome) => Json(IngestResponse {
            success: outcome.errors.is_empty(),
            processed: outcome.processed,
            conflicts: outcome.conflicts,
            errors: outcome.errors,
        })
        .into_response(),
        Err(e) => internal_error("ingest", e),
    }
}

// ---- read side ----

/// A stored row plus its read-time classification. Priority, confidence,
/// and timeline are recomputed from the stored score and timestamp on
/// every response, never trusted from storage.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SignalView {
    #[serde(flatten)]
    signal: StoredSignal,
    priority: Priority,
    confidence: f64,
    timeline: TimelineWindow,
    days_ago: i64,
}

impl SignalView {
    fn build(signal: StoredSignal, now: DateTime<Utc>) -> Self {
        let priority = derive_priority(Some(signal.relevance_score));
        let confidence = signal.relevance_score;
        let (timeline, days_ago) = timeline_bucket(signal.detected_at, now);
        SignalView {
            signal,
            priority,
            confidence,
            timeline,
            days_ago,
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: usize,
    limit: usize,
    total: usize,
    total_pages: usize,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    last_updated: DateTime<Utc>,
}

#[derive(serde::Serialize)]
struct ListResponse {
    success: bool,
    data: Vec<SignalView>,
    pagination: Pagination,
    meta: ListMeta,
}

async fn list_signals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SignalFilterParams>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return unauthorized();
    }

    let now = Utc::now();
    let query = SignalQuery::from_params(&params, now);
    match state.signals.query(&query).await {
        Ok(page) => {
            let data = page
                .rows
                .into_iter()
                .map(|row| SignalView::build(row, now))
                .collect::<Vec<_>>();
            Json(ListResponse {
                success: true,
                data,
                pagination: Pagination {
                    page: query.page,
                    limit: query.limit,
                    total: page.total,
                    total_pages: page.total.div_ceil(query.limit),
                },
                meta: ListMeta { last_updated: now },
            })
            .into_response()
        }
        Err(e) => internal_error("signals", e),
    }
}

// ---- by-subject aggregation ----

#[derive(serde::Deserialize)]
struct SubjectParams {
    /// Comma-joined subject ids owned by the caller.
    #[serde(default)]
    subjects: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectSummary {
    subject_id: String,
    total_signals: usize,
    latest_detected_at: DateTime<Utc>,
    top_signals: Vec<SignalView>,
}

#[derive(serde::Serialize)]
struct SubjectResponse {
    success: bool,
    data: Vec<SubjectSummary>,
}

async fn signals_by_subject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SubjectParams>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return unauthorized();
    }
    let subject_ids: Vec<String> = params
        .subjects
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if subject_ids.is_empty() {
        return bad_request("subjects must be a non-empty list");
    }

    let rows = match state
        .signals
        .recent_by_subjects(&subject_ids, SUBJECT_RECENT_CAP)
        .await
    {
        Ok(rows) => rows,
        Err(e) => return internal_error("signals/by-subject", e),
    };

    let now = Utc::now();
    // group in fetch order so top_signals keeps the store's
    // recency-then-relevance ordering
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, SubjectSummary> = HashMap::new();
    for row in rows {
        let Some(subject_id) = row.subject_id.clone() else {
            continue;
        };
        let entry = groups.entry(subject_id.clone()).or_insert_with(|| {
            order.push(subject_id.clone());
            SubjectSummary {
                subject_id,
                total_signals: 0,
                latest_detected_at: row.detected_at,
                top_signals: Vec::new(),
            }
        });
        entry.total_signals += 1;
        if row.detected_at > entry.latest_detected_at {
            entry.latest_detected_at = row.detected_at;
        }
        if entry.top_signals.len() < TOP_SIGNALS_PER_SUBJECT {
            entry.top_signals.push(SignalView::build(row, now));
        }
    }

    let data = order
        .iter()
        .filter_map(|id| groups.remove(id))
        .collect::<Vec<_>>();
    Json(SubjectResponse {
        success: true,
        data,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_axum::axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_non_empty_value() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-123"));
    }
}
