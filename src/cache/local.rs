//! Local on-disk cache store
//!
//! One JSON snapshot per data directory, reloadable across runs. The
//! snapshot embeds its own fetch timestamp; staleness is judged from that
//! metadata, never from file modification time.

use crate::cache::{CacheLookup, RecordCache};
use crate::models::{CacheEntry, ComplaintRecord, FetchWindow, Provenance};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SNAPSHOT_FILE: &str = "complaints_snapshot.json";

/// Snapshot layout on disk. A `BTreeMap` keyed by record id keeps the
/// serialized form deterministic, so idempotent upserts produce
/// byte-identical files.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    /// When the snapshot was last written back
    fetched_at: Option<DateTime<Utc>>,
    entries: BTreeMap<String, CacheEntry>,
}

pub struct LocalCacheStore {
    path: PathBuf,
}

impl LocalCacheStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(SNAPSHOT_FILE),
        })
    }

    fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Upsert with an explicit write timestamp. `put` delegates here with
    /// the current time; tests inject a fixed one.
    pub fn put_at(
        &self,
        records: &[ComplaintRecord],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut snapshot = self.load()?;
        for record in records {
            snapshot
                .entries
                .insert(record.id.clone(), CacheEntry::new(record.clone(), now));
        }
        snapshot.fetched_at = Some(now);
        self.save(&snapshot)?;
        debug!(count = records.len(), path = %self.path.display(), "Snapshot updated");
        Ok(records.len())
    }
}

#[async_trait::async_trait]
impl RecordCache for LocalCacheStore {
    fn name(&self) -> &'static str {
        "local-cache"
    }

    async fn get(&self, window: &FetchWindow) -> Result<CacheLookup> {
        let snapshot = self.load()?;
        let entries: Vec<CacheEntry> = snapshot
            .entries
            .into_values()
            .filter(|e| window.contains(e.record.date_received))
            .map(|mut e| {
                e.record.provenance = Provenance::LocalCache;
                e
            })
            .collect();

        info!(
            window = %window,
            hits = entries.len(),
            "Local snapshot queried"
        );
        Ok(CacheLookup::from_entries(entries))
    }

    async fn put(&self, records: &[ComplaintRecord]) -> Result<usize> {
        self.put_at(records, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::sample_record;
    use chrono::{Duration, NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalCacheStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 19, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn get_on_missing_snapshot_is_empty_not_error() {
        let (_dir, store) = store();
        let window = FetchWindow::months(1, 6, now());
        let lookup = store.get(&window).await.unwrap();
        assert!(lookup.is_empty());
    }

    #[tokio::test]
    async fn put_then_get_round_trips_within_window() {
        let (_dir, store) = store();
        let mut a = sample_record("a");
        a.date_received = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let mut b = sample_record("b");
        b.date_received = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        store.put_at(&[a, b], now()).unwrap();

        let window = FetchWindow::months(1, 6, now());
        let lookup = store.get(&window).await.unwrap();
        assert_eq!(lookup.entries.len(), 1);
        assert_eq!(lookup.entries[0].record.id, "a");
        assert_eq!(
            lookup.entries[0].record.provenance,
            Provenance::LocalCache
        );
        assert_eq!(lookup.fetched_at, Some(now()));
    }

    #[tokio::test]
    async fn double_put_is_byte_identical() {
        let (dir, store) = store();
        let record = sample_record("a");

        store.put_at(std::slice::from_ref(&record), now()).unwrap();
        let first = std::fs::read(dir.path().join(SNAPSHOT_FILE)).unwrap();

        store.put_at(std::slice::from_ref(&record), now()).unwrap();
        let second = std::fs::read(dir.path().join(SNAPSHOT_FILE)).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn upsert_never_deletes_prior_coverage() {
        let (_dir, store) = store();
        let mut old = sample_record("old");
        old.date_received = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        store.put_at(&[old], now() - Duration::days(10)).unwrap();

        let mut fresh = sample_record("fresh");
        fresh.date_received = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
        store.put_at(&[fresh], now()).unwrap();

        let window = FetchWindow::months(6, 6, now());
        let lookup = store.get(&window).await.unwrap();
        assert_eq!(lookup.entries.len(), 2);
    }

    #[tokio::test]
    async fn upsert_refreshes_cached_at() {
        let (_dir, store) = store();
        let record = sample_record("a");
        store
            .put_at(std::slice::from_ref(&record), now() - Duration::days(30))
            .unwrap();
        store.put_at(std::slice::from_ref(&record), now()).unwrap();

        let window = FetchWindow::months(6, 6, now());
        let lookup = store.get(&window).await.unwrap();
        assert_eq!(lookup.entries[0].cached_at, now());
    }
}
