//! Shared remote cache store
//!
//! Id-keyed store with secondary indexes on company, date, product and
//! state. Two implementations of the same trait: an in-memory store with
//! internally synchronized state for development and tests, and a
//! Postgres-backed store for hosted deployments.
//!
//! Classified tags are never persisted; per-query classified views are
//! ephemeral and caches hold raw records only.

use crate::cache::{CacheLookup, RecordCache};
use crate::models::{CacheEntry, ComplaintRecord, FetchWindow, Provenance};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

//
// ================= In-memory implementation =================
//

#[derive(Default)]
struct RemoteState {
    entries: HashMap<String, CacheEntry>,
    by_company: HashMap<String, HashSet<String>>,
    by_date: BTreeMap<NaiveDate, HashSet<String>>,
    by_product: HashMap<String, HashSet<String>>,
    by_state: HashMap<String, HashSet<String>>,
}

impl RemoteState {
    fn unindex(&mut self, entry: &CacheEntry) {
        let id = &entry.record.id;
        if let Some(set) = self.by_company.get_mut(&entry.record.company) {
            set.remove(id);
        }
        if let Some(set) = self.by_date.get_mut(&entry.record.date_received) {
            set.remove(id);
        }
        if let Some(set) = self.by_product.get_mut(&entry.record.product) {
            set.remove(id);
        }
        if let Some(set) = self.by_state.get_mut(&entry.record.state) {
            set.remove(id);
        }
    }

    fn index(&mut self, record: &ComplaintRecord) {
        let id = record.id.clone();
        self.by_company
            .entry(record.company.clone())
            .or_default()
            .insert(id.clone());
        self.by_date
            .entry(record.date_received)
            .or_default()
            .insert(id.clone());
        self.by_product
            .entry(record.product.clone())
            .or_default()
            .insert(id.clone());
        self.by_state
            .entry(record.state.clone())
            .or_default()
            .insert(id);
    }

    fn upsert(&mut self, record: &ComplaintRecord, now: DateTime<Utc>) {
        if let Some(previous) = self.entries.remove(&record.id) {
            self.unindex(&previous);
        }
        self.index(record);
        self.entries
            .insert(record.id.clone(), CacheEntry::new(record.clone(), now));
    }

    fn collect(&self, ids: impl IntoIterator<Item = String>) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = ids
            .into_iter()
            .filter_map(|id| self.entries.get(&id).cloned())
            .map(|mut e| {
                e.record.provenance = Provenance::RemoteCache;
                e
            })
            .collect();
        entries.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        entries
    }
}

/// In-memory remote cache with the same observable behaviour as the
/// Postgres store. Constructed once at process start; never a
/// module-level singleton.
pub struct InMemoryRemoteCache {
    state: Arc<RwLock<RemoteState>>,
}

impl InMemoryRemoteCache {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RemoteState::default())),
        }
    }

    /// Upsert with an explicit timestamp, for deterministic tests.
    pub async fn put_at(
        &self,
        records: &[ComplaintRecord],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        for record in records {
            state.upsert(record, now);
        }
        Ok(records.len())
    }

    pub async fn by_company(&self, company: &str) -> Result<CacheLookup> {
        let state = self.state.read().await;
        let ids = state
            .by_company
            .get(company)
            .map(|s| s.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(CacheLookup::from_entries(state.collect(ids)))
    }

    pub async fn by_product(&self, product: &str) -> Result<CacheLookup> {
        let state = self.state.read().await;
        let ids = state
            .by_product
            .get(product)
            .map(|s| s.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(CacheLookup::from_entries(state.collect(ids)))
    }

    pub async fn by_state(&self, state_code: &str) -> Result<CacheLookup> {
        let state = self.state.read().await;
        let ids = state
            .by_state
            .get(state_code)
            .map(|s| s.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(CacheLookup::from_entries(state.collect(ids)))
    }
}

impl Default for InMemoryRemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RecordCache for InMemoryRemoteCache {
    fn name(&self) -> &'static str {
        "remote-cache"
    }

    async fn get(&self, window: &FetchWindow) -> Result<CacheLookup> {
        let state = self.state.read().await;
        let ids: Vec<String> = state
            .by_date
            .range(window.start..=window.end)
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect();
        let entries = state.collect(ids);
        debug!(window = %window, hits = entries.len(), "Remote cache queried");
        Ok(CacheLookup::from_entries(entries))
    }

    async fn put(&self, records: &[ComplaintRecord]) -> Result<usize> {
        self.put_at(records, Utc::now()).await
    }
}

//
// ================= Postgres implementation =================
//

/// Table and index DDL for the hosted store. Applied statement by
/// statement by `ensure_schema`.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS complaint_cache (
        complaint_id      TEXT PRIMARY KEY,
        date_received     DATE NOT NULL,
        product           TEXT NOT NULL,
        sub_product       TEXT NOT NULL DEFAULT '',
        issue             TEXT NOT NULL DEFAULT '',
        sub_issue         TEXT NOT NULL DEFAULT '',
        company           TEXT NOT NULL,
        state             TEXT NOT NULL DEFAULT '',
        zip               TEXT NOT NULL DEFAULT '',
        submitted_via     TEXT NOT NULL DEFAULT '',
        company_response  TEXT NOT NULL DEFAULT '',
        timely_response   TEXT NOT NULL DEFAULT '',
        consumer_disputed TEXT NOT NULL DEFAULT '',
        narrative         TEXT,
        cached_at         TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_complaint_cache_date ON complaint_cache (date_received)",
    "CREATE INDEX IF NOT EXISTS idx_complaint_cache_company ON complaint_cache (company)",
    "CREATE INDEX IF NOT EXISTS idx_complaint_cache_product ON complaint_cache (product)",
    "CREATE INDEX IF NOT EXISTS idx_complaint_cache_state ON complaint_cache (state)",
];

const UPSERT: &str = "INSERT INTO complaint_cache (
        complaint_id, date_received, product, sub_product, issue, sub_issue,
        company, state, zip, submitted_via, company_response,
        timely_response, consumer_disputed, narrative, cached_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
    ON CONFLICT (complaint_id) DO UPDATE SET
        date_received = EXCLUDED.date_received,
        product = EXCLUDED.product,
        sub_product = EXCLUDED.sub_product,
        issue = EXCLUDED.issue,
        sub_issue = EXCLUDED.sub_issue,
        company = EXCLUDED.company,
        state = EXCLUDED.state,
        zip = EXCLUDED.zip,
        submitted_via = EXCLUDED.submitted_via,
        company_response = EXCLUDED.company_response,
        timely_response = EXCLUDED.timely_response,
        consumer_disputed = EXCLUDED.consumer_disputed,
        narrative = EXCLUDED.narrative,
        cached_at = EXCLUDED.cached_at";

#[derive(sqlx::FromRow)]
struct ComplaintRow {
    complaint_id: String,
    date_received: NaiveDate,
    product: String,
    sub_product: String,
    issue: String,
    sub_issue: String,
    company: String,
    state: String,
    zip: String,
    submitted_via: String,
    company_response: String,
    timely_response: String,
    consumer_disputed: String,
    narrative: Option<String>,
    cached_at: DateTime<Utc>,
}

impl From<ComplaintRow> for CacheEntry {
    fn from(row: ComplaintRow) -> Self {
        CacheEntry::new(
            ComplaintRecord {
                id: row.complaint_id,
                date_received: row.date_received,
                product: row.product,
                sub_product: row.sub_product,
                issue: row.issue,
                sub_issue: row.sub_issue,
                company: row.company,
                state: row.state,
                zip: row.zip,
                submitted_via: row.submitted_via,
                company_response: row.company_response,
                timely_response: row.timely_response,
                consumer_disputed: row.consumer_disputed,
                narrative: row.narrative,
                tags: Vec::new(),
                provenance: Provenance::RemoteCache,
            },
            row.cached_at,
        )
    }
}

/// Postgres-backed shared cache for hosted deployments.
pub struct PostgresRemoteCache {
    pool: PgPool,
}

impl PostgresRemoteCache {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to remote cache database");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn by_company(&self, company: &str) -> Result<CacheLookup> {
        self.by_field("company", company).await
    }

    pub async fn by_product(&self, product: &str) -> Result<CacheLookup> {
        self.by_field("product", product).await
    }

    pub async fn by_state(&self, state_code: &str) -> Result<CacheLookup> {
        self.by_field("state", state_code).await
    }

    async fn by_field(&self, column: &'static str, value: &str) -> Result<CacheLookup> {
        let query = format!(
            "SELECT * FROM complaint_cache WHERE {} = $1 ORDER BY complaint_id",
            column
        );
        let rows: Vec<ComplaintRow> = sqlx::query_as(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
        Ok(CacheLookup::from_entries(
            rows.into_iter().map(CacheEntry::from).collect(),
        ))
    }
}

#[async_trait::async_trait]
impl RecordCache for PostgresRemoteCache {
    fn name(&self) -> &'static str {
        "remote-cache"
    }

    async fn get(&self, window: &FetchWindow) -> Result<CacheLookup> {
        let rows: Vec<ComplaintRow> = sqlx::query_as(
            "SELECT * FROM complaint_cache
             WHERE date_received BETWEEN $1 AND $2
             ORDER BY complaint_id",
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        debug!(window = %window, hits = rows.len(), "Remote cache queried");
        Ok(CacheLookup::from_entries(
            rows.into_iter().map(CacheEntry::from).collect(),
        ))
    }

    async fn put(&self, records: &[ComplaintRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(UPSERT)
                .bind(&record.id)
                .bind(record.date_received)
                .bind(&record.product)
                .bind(&record.sub_product)
                .bind(&record.issue)
                .bind(&record.sub_issue)
                .bind(&record.company)
                .bind(&record.state)
                .bind(&record.zip)
                .bind(&record.submitted_via)
                .bind(&record.company_response)
                .bind(&record.timely_response)
                .bind(&record.consumer_disputed)
                .bind(record.narrative.as_deref())
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::sample_record;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 19, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let cache = InMemoryRemoteCache::new();
        let record = sample_record("100");

        cache.put_at(std::slice::from_ref(&record), now()).await.unwrap();
        cache.put_at(std::slice::from_ref(&record), now()).await.unwrap();

        let window = FetchWindow::months(6, 6, now());
        let lookup = cache.get(&window).await.unwrap();
        assert_eq!(lookup.entries.len(), 1);
        assert_eq!(lookup.entries[0].record.provenance, Provenance::RemoteCache);
    }

    #[tokio::test]
    async fn indexes_follow_field_changes() {
        let cache = InMemoryRemoteCache::new();
        let mut record = sample_record("100");
        cache.put_at(std::slice::from_ref(&record), now()).await.unwrap();

        record.company = "Another Bank".to_string();
        cache.put_at(std::slice::from_ref(&record), now()).await.unwrap();

        let stale_index = cache.by_company("Sample Bank").await.unwrap();
        assert!(stale_index.is_empty());
        let current = cache.by_company("Another Bank").await.unwrap();
        assert_eq!(current.entries.len(), 1);
    }

    #[tokio::test]
    async fn window_query_uses_date_index() {
        let cache = InMemoryRemoteCache::new();
        let mut inside = sample_record("in");
        inside.date_received = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let mut outside = sample_record("out");
        outside.date_received = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();

        cache.put_at(&[inside, outside], now()).await.unwrap();

        let window = FetchWindow::months(1, 6, now());
        let lookup = cache.get(&window).await.unwrap();
        assert_eq!(lookup.entries.len(), 1);
        assert_eq!(lookup.entries[0].record.id, "in");
    }

    #[tokio::test]
    async fn state_and_product_indexes_answer_queries() {
        let cache = InMemoryRemoteCache::new();
        let mut a = sample_record("a");
        a.state = "NY".to_string();
        let b = sample_record("b");
        cache.put_at(&[a, b], now()).await.unwrap();

        assert_eq!(cache.by_state("NY").await.unwrap().entries.len(), 1);
        assert_eq!(cache.by_state("CA").await.unwrap().entries.len(), 1);
        assert_eq!(
            cache
                .by_product("Checking or savings account")
                .await
                .unwrap()
                .entries
                .len(),
            2
        );
    }
}
