//! Core data models for the complaint pipeline

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Provenance =================
//

/// Where a record copy originated. Used to break dedup ties: a live fetch
/// always supersedes a cache copy of the same id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    RemoteCache,
    LocalCache,
    Live,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::RemoteCache => "remote-cache",
            Provenance::LocalCache => "local-cache",
            Provenance::Live => "live",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Complaint Record =================
//

/// One consumer complaint. The schema is fixed to the known public
/// complaint fields; ids are globally unique strings assigned by the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplaintRecord {
    pub id: String,
    pub date_received: NaiveDate,
    pub product: String,
    #[serde(default)]
    pub sub_product: String,
    pub issue: String,
    #[serde(default)]
    pub sub_issue: String,
    pub company: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub submitted_via: String,
    #[serde(default)]
    pub company_response: String,
    #[serde(default)]
    pub timely_response: String,
    #[serde(default)]
    pub consumer_disputed: String,
    pub narrative: Option<String>,
    /// Category labels assigned by the classification engine (0..N, sorted)
    #[serde(default)]
    pub tags: Vec<String>,
    pub provenance: Provenance,
}

impl ComplaintRecord {
    /// True when the narrative is present and non-blank.
    pub fn has_narrative(&self) -> bool {
        self.narrative
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false)
    }

    /// Add a category label, keeping the tag set sorted and deduplicated.
    pub fn add_tag(&mut self, label: &str) {
        if !self.tags.iter().any(|t| t == label) {
            self.tags.push(label.to_string());
            self.tags.sort();
        }
    }
}

/// Link to the canonical public record for a complaint id.
pub fn detail_url(base: &str, complaint_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), complaint_id)
}

//
// ================= Cache Entry =================
//

/// A cached record copy plus the time it was written to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: ComplaintRecord,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(record: ComplaintRecord, cached_at: DateTime<Utc>) -> Self {
        Self { record, cached_at }
    }

    /// An entry is stale when it is older than the TTL. Metadata from the
    /// future is implausible and is treated the same way: never trusted.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.cached_at > now || now - self.cached_at > ttl
    }
}

//
// ================= Fetch Window =================
//

/// Requested [start, end] date range, always resolved relative to "now",
/// never a fixed historical date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// Rolling window of `months` (~30 days each) ending at `now`. The
    /// month count is clamped to `1..=bound`.
    pub fn months(months: u32, bound: u32, now: DateTime<Utc>) -> Self {
        let months = months.clamp(1, bound.max(1));
        let end = now.date_naive();
        let start = end - Duration::days(30 * i64::from(months));
        Self { start, end }
    }

    /// Explicit range; start and end are swapped if given out of order.
    pub fn explicit(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

//
// ================= Category Rules =================
//

/// A keyword classification rule: label plus ordered matcher phrases.
/// Rules are data; one generic routine in the filter engine evaluates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub label: String,
    /// Phrases matched case-insensitively on word boundaries
    pub matchers: Vec<String>,
    /// Also match against issue / sub-issue text, not just the narrative
    #[serde(default)]
    pub match_issue_text: bool,
}

//
// ================= Summaries =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub product: String,
    pub count: usize,
    /// Share of the total filtered set, in percent
    pub percentage: f64,
    /// 1-based deterministic rank
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTrendSummary {
    /// The parent top-level product category
    pub parent: String,
    pub label: String,
    pub count: usize,
    /// Share within the parent category, in percent
    pub percentage: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyRanking {
    /// First-seen raw company name for display
    pub company: String,
    /// Normalized name used for grouping
    pub normalized: String,
    pub count: usize,
    pub percentage: f64,
    pub rank: usize,
}

//
// ================= Triangulation =================
//

/// Cross-reference of a local trend category against a secondary
/// statistics source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangulationResult {
    pub category: String,
    pub secondary_categories: Vec<String>,
    /// Share of this category in the local filtered set (0..1)
    pub local_share: f64,
    /// Combined share of the mapped categories in the secondary source (0..1)
    pub secondary_share: f64,
    pub delta: f64,
    /// Advisory flag only; divergence is never a hard failure
    pub divergent: bool,
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A plausible record for unit tests across the crate.
    pub(crate) fn sample_record(id: &str) -> ComplaintRecord {
        ComplaintRecord {
            id: id.to_string(),
            date_received: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            product: "Checking or savings account".to_string(),
            sub_product: String::new(),
            issue: "Managing an account".to_string(),
            sub_issue: String::new(),
            company: "Sample Bank".to_string(),
            state: "CA".to_string(),
            zip: "94103".to_string(),
            submitted_via: "Web".to_string(),
            company_response: "Closed with explanation".to_string(),
            timely_response: "Yes".to_string(),
            consumer_disputed: "N/A".to_string(),
            narrative: Some("The bank charged a fee I never authorized".to_string()),
            tags: Vec::new(),
            provenance: Provenance::Live,
        }
    }
}
