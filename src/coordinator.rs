//! Acquisition coordinator
//!
//! Produces the union of records fully covering a fetch window using the
//! cheapest sufficient source(s): try caches in policy order, accept a
//! fresh covering hit, otherwise backfill the missing sub-ranges from the
//! live API, merge by id and write the merged set back to every cache.

use crate::cache::{RecordCache, COVERAGE_TOLERANCE_DAYS};
use crate::client::{CancelFlag, LiveSource};
use crate::error::PipelineError;
use crate::models::{CacheEntry, ComplaintRecord, FetchWindow, Provenance};
use crate::policy::{FetchPolicy, SourceKind};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct AcquisitionCoordinator {
    policy: FetchPolicy,
    remote: Option<Arc<dyn RecordCache>>,
    local: Option<Arc<dyn RecordCache>>,
    live: Arc<dyn LiveSource>,
    cache_ttl: Duration,
    /// Bound on every cache call; a hung store fails over like an
    /// unreachable one
    cache_timeout: std::time::Duration,
}

impl AcquisitionCoordinator {
    pub fn new(
        policy: FetchPolicy,
        remote: Option<Arc<dyn RecordCache>>,
        local: Option<Arc<dyn RecordCache>>,
        live: Arc<dyn LiveSource>,
        cache_ttl: Duration,
        cache_timeout: std::time::Duration,
    ) -> Self {
        Self {
            policy,
            remote,
            local,
            live,
            cache_ttl,
            cache_timeout,
        }
    }

    fn cache_for(&self, kind: SourceKind) -> Option<&Arc<dyn RecordCache>> {
        match kind {
            SourceKind::RemoteCache => self.remote.as_ref(),
            SourceKind::LocalCache => self.local.as_ref(),
            SourceKind::Live => None,
        }
    }

    /// Acquire a deduplicated record set covering the window.
    ///
    /// Returns `DataUnavailable` only when the live fetch fails and no
    /// cache supplied any records; stale or partial cache data otherwise
    /// degrades the result rather than failing the run. Every cache call
    /// is bounded by `cache_timeout` and an elapsed deadline counts as
    /// that source failing.
    pub async fn acquire(
        &self,
        window: &FetchWindow,
        cancel: &CancelFlag,
    ) -> Result<Vec<ComplaintRecord>> {
        let now = Utc::now();
        let mut attempts: Vec<String> = Vec::new();
        // Fresh entries count toward coverage; stale ones only join the
        // merge (where any live copy supersedes them).
        let mut fresh: Vec<CacheEntry> = Vec::new();
        let mut stale: Vec<CacheEntry> = Vec::new();

        for &source in self.policy.source_order() {
            if source == SourceKind::Live {
                break;
            }
            let Some(cache) = self.cache_for(source) else {
                attempts.push(format!("{}: not configured", source));
                continue;
            };

            // An unreachable or hung store is an empty result, not a
            // pipeline abort
            let lookup = match timeout(self.cache_timeout, cache.get(window)).await {
                Ok(Ok(lookup)) => lookup,
                Ok(Err(e)) => {
                    warn!(source = %source, error = %e, "Cache unreachable; falling through");
                    attempts.push(format!("{}: {}", source, e));
                    continue;
                }
                Err(_) => {
                    warn!(source = %source, "Cache lookup timed out; falling through");
                    attempts.push(format!("{}: timed out", source));
                    continue;
                }
            };

            if lookup.is_empty() {
                attempts.push(format!("{}: empty", source));
                continue;
            }

            if lookup.is_fresh(self.cache_ttl, now) {
                if lookup.covers(window) {
                    info!(source = %source, count = lookup.entries.len(),
                          "Cache covers window; skipping live fetch");
                    return Ok(finalize(merge(Vec::new(), lookup.entries)));
                }
                attempts.push(format!("{}: partial coverage", source));
                fresh.extend(lookup.entries);
            } else {
                // StaleCacheDetected: never trusted silently
                warn!(source = %source, error = %PipelineError::StaleCache,
                      "Cache hit failed freshness check; will re-fetch");
                attempts.push(format!("{}: stale", source));
                stale.extend(lookup.entries);
            }
        }

        // Backfill only what fresh cache data does not already cover
        let gaps = missing_subranges(window, &fresh);
        debug!(window = %window, gaps = gaps.len(), "Fetching missing sub-ranges");

        let mut live_records: Vec<ComplaintRecord> = Vec::new();
        let mut live_failed: Option<String> = None;

        let mut handles = Vec::with_capacity(gaps.len());
        for gap in gaps {
            let live = Arc::clone(&self.live);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                live.fetch(&gap, &cancel).await
            }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(records)) => live_records.extend(records),
                Ok(Err(PipelineError::Cancelled)) => return Err(PipelineError::Cancelled),
                Ok(Err(e)) => {
                    live_failed = Some(e.to_string());
                }
                Err(e) => {
                    live_failed = Some(format!("fetch task failed: {}", e));
                }
            }
        }

        if let Some(reason) = live_failed {
            attempts.push(format!("live: {}", reason));
            if fresh.is_empty() && stale.is_empty() {
                return Err(PipelineError::DataUnavailable {
                    window: window.to_string(),
                    attempts: attempts.join("; "),
                });
            }
            // Degrade to the cached subset; nothing new to write back
            warn!(window = %window, attempts = %attempts.join("; "),
                  "Live backfill failed; degrading to cached records");
            fresh.extend(stale);
            return Ok(finalize(merge(Vec::new(), fresh)));
        }

        fresh.extend(stale);
        let merged = merge(live_records, fresh);

        // A cancelled, incomplete window must never be written back as
        // fully covered
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.write_back(&merged).await;

        Ok(finalize(merged))
    }

    async fn write_back(&self, records: &[ComplaintRecord]) {
        for cache in [self.remote.as_ref(), self.local.as_ref()].into_iter().flatten() {
            match timeout(self.cache_timeout, cache.put(records)).await {
                Ok(Ok(count)) => debug!(cache = cache.name(), count, "Write-back complete"),
                Ok(Err(e)) => warn!(cache = cache.name(), error = %e, "Write-back failed"),
                Err(_) => warn!(cache = cache.name(), "Write-back timed out"),
            }
        }
    }
}

/// Sub-ranges of `window` not covered by the fresh cache entries. The
/// tail tolerates the publication lag; the head does not.
fn missing_subranges(window: &FetchWindow, fresh: &[CacheEntry]) -> Vec<FetchWindow> {
    let dates = fresh.iter().map(|e| e.record.date_received);
    let (Some(first), Some(last)) = (dates.clone().min(), dates.max()) else {
        return vec![*window];
    };

    let mut gaps = Vec::new();
    if first > window.start {
        gaps.push(FetchWindow::explicit(window.start, first - Duration::days(1)));
    }
    if last < window.end - Duration::days(COVERAGE_TOLERANCE_DAYS) {
        gaps.push(FetchWindow::explicit(last + Duration::days(1), window.end));
    }
    gaps
}

/// Dedup by id. A live copy always supersedes any cache copy; between
/// cache copies the most recently cached one wins.
fn merge(live: Vec<ComplaintRecord>, cached: Vec<CacheEntry>) -> Vec<ComplaintRecord> {
    let mut by_id: HashMap<String, (ComplaintRecord, Option<DateTime<Utc>>)> =
        HashMap::with_capacity(live.len() + cached.len());

    for entry in cached {
        match by_id.get(&entry.record.id) {
            Some((_, Some(existing_at))) if *existing_at >= entry.cached_at => {}
            _ => {
                by_id.insert(entry.record.id.clone(), (entry.record, Some(entry.cached_at)));
            }
        }
    }
    for record in live {
        debug_assert_eq!(record.provenance, Provenance::Live);
        by_id.insert(record.id.clone(), (record, None));
    }

    by_id.into_values().map(|(record, _)| record).collect()
}

/// Deterministic output order: by received date, then id.
fn finalize(mut records: Vec<ComplaintRecord>) -> Vec<ComplaintRecord> {
    records.sort_by(|a, b| {
        a.date_received
            .cmp(&b.date_received)
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}
