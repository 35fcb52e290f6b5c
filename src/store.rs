//! Repository seams for the backing store, plus the in-memory
//! implementations used by the binary and by deterministic tests.
//!
//! The pipeline and handlers depend only on the traits; swapping in a
//! relational store means implementing them over SQL and enforcing a
//! unique constraint on the audit `(batch_id, source)` pair.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::merge::SignalUpdate;
use crate::query::SignalQuery;
use crate::signal::{AuditRecord, SignalSource, StoredSignal};

/// One page of query results plus the unpaginated total.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub rows: Vec<StoredSignal>,
    pub total: usize,
}

#[async_trait]
pub trait SignalRepo: Send + Sync {
    /// Rows whose fingerprint could collide with a batch touching the
    /// given subjects. `include_unassigned` also fetches rows with no
    /// subject.
    async fn find_by_subjects(
        &self,
        subject_ids: &[String],
        include_unassigned: bool,
    ) -> Result<Vec<StoredSignal>>;

    async fn insert(&self, row: StoredSignal) -> Result<()>;

    /// Apply a planned update; `Err` if the row vanished.
    async fn update_by_id(&self, update: &SignalUpdate) -> Result<()>;

    /// Execute a resolved read-side query: filter, sort, paginate.
    async fn query(&self, query: &SignalQuery) -> Result<QueryPage>;

    /// Up to `cap` most recent rows for the given subjects, ordered by
    /// recency then relevance.
    async fn recent_by_subjects(&self, subject_ids: &[String], cap: usize)
        -> Result<Vec<StoredSignal>>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn find(&self, batch_id: &str, source: SignalSource) -> Result<Option<AuditRecord>>;

    /// Record a processed batch. `Err` when the `(batch_id, source)` pair
    /// already exists, mirroring a storage-level unique constraint.
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// In-memory signal table behind an `RwLock`.
#[derive(Debug, Default)]
pub struct InMemorySignalRepo {
    rows: RwLock<Vec<StoredSignal>>,
}

impl InMemorySignalRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for test assertions.
    pub fn dump(&self) -> Vec<StoredSignal> {
        self.rows.read().expect("signal store poisoned").clone()
    }
}

#[async_trait]
impl SignalRepo for InMemorySignalRepo {
    async fn find_by_subjects(
        &self,
        subject_ids: &[String],
        include_unassigned: bool,
    ) -> Result<Vec<StoredSignal>> {
        let rows = self.rows.read().expect("signal store poisoned");
        Ok(rows
            .iter()
            .filter(|r| match &r.subject_id {
                Some(id) => subject_ids.contains(id),
                None => include_unassigned,
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, row: StoredSignal) -> Result<()> {
        let mut rows = self.rows.write().expect("signal store poisoned");
        rows.push(row);
        Ok(())
    }

    async fn update_by_id(&self, update: &SignalUpdate) -> Result<()> {
        let mut rows = self.rows.write().expect("signal store poisoned");
        let row = rows
            .iter_mut()
            .find(|r| r.id == update.id)
            .ok_or_else(|| anyhow!("signal {} not found", update.id))?;
        if let Some(content) = &update.content {
            row.title = content.title.clone();
            row.description = content.description.clone();
            row.relevance_score = content.relevance_score;
            row.detected_at = content.detected_at;
            row.metadata = content.metadata.clone();
        }
        row.source_trace = update.source_trace.clone();
        row.updated_at = update.updated_at;
        Ok(())
    }

    async fn query(&self, query: &SignalQuery) -> Result<QueryPage> {
        let rows = self.rows.read().expect("signal store poisoned");
        let mut matched: Vec<StoredSignal> =
            rows.iter().filter(|r| query.matches(r)).cloned().collect();
        matched.sort_by(|a, b| query.compare(a, b));
        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset())
            .take(query.limit)
            .collect();
        Ok(QueryPage { rows: page, total })
    }

    async fn recent_by_subjects(
        &self,
        subject_ids: &[String],
        cap: usize,
    ) -> Result<Vec<StoredSignal>> {
        let rows = self.rows.read().expect("signal store poisoned");
        let mut matched: Vec<StoredSignal> = rows
            .iter()
            .filter(|r| {
                r.subject_id
                    .as_ref()
                    .is_some_and(|id| subject_ids.contains(id))
            })
            .cloned()
            .collect();
        // recency first, relevance breaks ties
        matched.sort_by(|a, b| {
            b.detected_at
                .cmp(&a.detected_at)
                .then(b.relevance_score.total_cmp(&a.relevance_score))
        });
        matched.truncate(cap);
        Ok(matched)
    }
}

/// In-memory audit table. The single lock serializes check-then-act for a
/// `(batch_id, source)` pair, standing in for a unique constraint.
#[derive(Debug, Default)]
pub struct InMemoryAuditRepo {
    records: RwLock<HashMap<(String, SignalSource), AuditRecord>>,
}

impl InMemoryAuditRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepo for InMemoryAuditRepo {
    async fn find(&self, batch_id: &str, source: SignalSource) -> Result<Option<AuditRecord>> {
        let records = self.records.read().expect("audit store poisoned");
        Ok(records.get(&(batch_id.to_string(), source)).cloned())
    }

    async fn record(&self, record: AuditRecord) -> Result<()> {
        let mut records = self.records.write().expect("audit store poisoned");
        let key = (record.batch_id.clone(), record.source);
        if records.contains_key(&key) {
            return Err(anyhow!(
                "audit record already exists for batch '{}' from {}",
                record.batch_id,
                record.source.as_str()
            ));
        }
        records.insert(key, record);
        Ok(())
    }
}
