//! Cache store abstraction
//!
//! Both cache tiers implement one async trait, mirroring how the rest of
//! the pipeline treats them: a queryable, append/update-only record store.
//! A miss is an empty lookup, never an error; an unreachable store is an
//! error the coordinator logs and falls through.

pub mod local;
pub mod remote;

use crate::models::{CacheEntry, ComplaintRecord, FetchWindow};
use crate::Result;
use chrono::{DateTime, Duration, Utc};

pub use local::LocalCacheStore;
pub use remote::{InMemoryRemoteCache, PostgresRemoteCache};

/// Days of missing coverage tolerated at the tail of a window. Complaint
/// publication lags a few days, so a cache that stops just short of "now"
/// still counts as covering the window.
pub const COVERAGE_TOLERANCE_DAYS: i64 = 7;

/// Result of querying a cache tier for a window.
#[derive(Debug, Clone, Default)]
pub struct CacheLookup {
    pub entries: Vec<CacheEntry>,
    /// Oldest `cached_at` among the returned entries. One stale row forces
    /// revalidation of the whole lookup.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CacheLookup {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let fetched_at = entries.iter().map(|e| e.cached_at).min();
        Self { entries, fetched_at }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// TTL/validity check over the lookup's fetch metadata. Metadata from
    /// the future is implausible and fails the check.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            Some(at) => at <= now && now - at <= ttl,
            None => false,
        }
    }

    /// True when the returned records span the window, allowing the
    /// publication-lag tolerance at the tail.
    pub fn covers(&self, window: &FetchWindow) -> bool {
        let dates = self.entries.iter().map(|e| e.record.date_received);
        match (dates.clone().min(), dates.max()) {
            (Some(first), Some(last)) => {
                first <= window.start
                    && last >= window.end - Duration::days(COVERAGE_TOLERANCE_DAYS)
            }
            _ => false,
        }
    }

    /// Unwrap into plain records.
    pub fn into_records(self) -> Vec<ComplaintRecord> {
        self.entries.into_iter().map(|e| e.record).collect()
    }
}

/// A cache tier for complaint records.
///
/// `put` is an idempotent upsert keyed by record id: concurrent writers
/// converge on the same final state regardless of interleaving. Stores
/// never delete; historical coverage is preserved.
#[async_trait::async_trait]
pub trait RecordCache: Send + Sync {
    fn name(&self) -> &'static str;

    /// Records whose `date_received` falls inside the window, with
    /// staleness metadata. Empty, not an error, when nothing matches.
    async fn get(&self, window: &FetchWindow) -> Result<CacheLookup>;

    /// Upsert by id, refreshing `cached_at`. Returns the number of
    /// records written.
    async fn put(&self, records: &[ComplaintRecord]) -> Result<usize>;
}
