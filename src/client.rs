//! Live complaint search API client
//!
//! Pages through the public search endpoint with `frm`/`size` offsets,
//! using one long-lived reqwest::Client for connection pooling. Retry,
//! backoff and rate-limit handling are modeled as an explicit state
//! machine so cancellation and timeout behaviour stay testable.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{ComplaintRecord, FetchWindow, Provenance};
use crate::Result;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// API-side cap on paging depth; requests beyond it return 400.
const MAX_PAGE_OFFSET: usize = 10_000;

/// Cooperative cancellation handle shared between the caller and an
/// in-flight acquisition. Checked between pages; in-flight requests are
/// bounded by the per-request timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Paging/retry loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Backoff { attempt: u32 },
    Succeeded,
    Failed,
}

/// Bounded exponential backoff: base * 2^attempt, capped.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.min(cap_ms))
}

/// What one page request resolved to, after status classification.
#[derive(Debug)]
enum PageOutcome {
    Records(Vec<ComplaintRecord>),
    /// Deep-offset 400: the API refuses further paging; end cleanly
    EndOfPaging,
    /// Timeout / 5xx: retry after backoff
    Transient(String),
    /// 429: cooldown, then retry after backoff
    RateLimited,
    /// Other client errors abort the page
    Fatal(String),
}

//
// ================= Wire format =================
//

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: ApiComplaint,
}

#[derive(Debug, Deserialize)]
struct ApiComplaint {
    #[serde(default)]
    complaint_id: String,
    #[serde(default)]
    date_received: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    sub_product: String,
    #[serde(default)]
    issue: String,
    #[serde(default)]
    sub_issue: String,
    #[serde(default)]
    company: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    submitted_via: String,
    #[serde(default)]
    company_response: String,
    #[serde(default)]
    timely: String,
    #[serde(default)]
    consumer_disputed: String,
    #[serde(default)]
    complaint_what_happened: Option<String>,
}

impl ApiComplaint {
    /// Convert a wire record; None when the id or date is unusable.
    fn into_record(self) -> Option<ComplaintRecord> {
        if self.complaint_id.is_empty() {
            return None;
        }
        // Dates arrive as "YYYY-MM-DD" or with a time suffix
        let date_part = self.date_received.get(..10)?;
        let date_received = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        Some(ComplaintRecord {
            id: self.complaint_id,
            date_received,
            product: self.product,
            sub_product: self.sub_product,
            issue: self.issue,
            sub_issue: self.sub_issue,
            company: self.company,
            state: self.state,
            zip: self.zip_code,
            submitted_via: self.submitted_via,
            company_response: self.company_response,
            timely_response: self.timely,
            consumer_disputed: self.consumer_disputed,
            narrative: self.complaint_what_happened.filter(|n| !n.trim().is_empty()),
            tags: Vec::new(),
            provenance: Provenance::Live,
        })
    }
}

fn parse_page(body: &str) -> Result<Vec<ComplaintRecord>> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let total = response.hits.hits.len();
    let records: Vec<ComplaintRecord> = response
        .hits
        .hits
        .into_iter()
        .filter_map(|h| h.source.into_record())
        .collect();
    if records.len() < total {
        warn!(
            dropped = total - records.len(),
            "Dropped records with unusable id or date"
        );
    }
    Ok(records)
}

//
// ================= Client =================
//

/// Seam for the live API, so the coordinator can be exercised without
/// network access.
#[async_trait::async_trait]
pub trait LiveSource: Send + Sync {
    async fn fetch(
        &self,
        window: &FetchWindow,
        cancel: &CancelFlag,
    ) -> Result<Vec<ComplaintRecord>>;
}

pub struct LiveSourceClient {
    client: Client,
    base_url: String,
    page_size: usize,
    max_records: usize,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    rate_limit_cooldown: Duration,
}

impl LiveSourceClient {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string() + "/",
            page_size: config.page_size,
            max_records: config.max_records,
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            backoff_cap_ms: config.backoff_cap_ms,
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
        })
    }

    /// Fetch all pages for a window, deduplicating ids across page
    /// boundaries. The result is complete for the window or an error;
    /// partial pages are never returned.
    pub async fn fetch(
        &self,
        window: &FetchWindow,
        cancel: &CancelFlag,
    ) -> Result<Vec<ComplaintRecord>> {
        let mut state = FetchState::Idle;
        debug!(state = ?state, window = %window, "Fetch state");
        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<ComplaintRecord> = Vec::new();
        let mut frm = 0usize;
        let max_offset = MAX_PAGE_OFFSET.min(self.max_records);

        info!(window = %window, page_size = self.page_size, "Live fetch starting");

        'paging: while frm < max_offset && records.len() < self.max_records {
            if cancel.is_cancelled() {
                warn!(window = %window, "Live fetch cancelled");
                return Err(PipelineError::Cancelled);
            }

            let size = self.page_size.min(self.max_records - records.len());
            let mut attempt = 0u32;

            let page = loop {
                state = FetchState::Fetching;
                debug!(state = ?state, frm, "Fetch state");
                match self.request_page(window, frm, size).await {
                    PageOutcome::Records(page) => break page,
                    PageOutcome::EndOfPaging => {
                        debug!(frm, "Paging stopped by deep-offset response");
                        break 'paging;
                    }
                    PageOutcome::Fatal(reason) => {
                        state = FetchState::Failed;
                        debug!(state = ?state, frm, "Fetch state");
                        return Err(PipelineError::source("live", reason));
                    }
                    PageOutcome::RateLimited => {
                        if attempt >= self.max_retries {
                            state = FetchState::Failed;
                            debug!(state = ?state, frm, "Fetch state");
                            return Err(PipelineError::source("live", "rate limit retries exhausted"));
                        }
                        warn!(frm, attempt, "Rate limited; cooling down");
                        tokio::time::sleep(self.rate_limit_cooldown).await;
                        state = FetchState::Backoff { attempt };
                        debug!(state = ?state, frm, "Fetch state");
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.backoff_base_ms,
                            self.backoff_cap_ms,
                        ))
                        .await;
                        attempt += 1;
                    }
                    PageOutcome::Transient(reason) => {
                        if attempt >= self.max_retries {
                            state = FetchState::Failed;
                            debug!(state = ?state, frm, "Fetch state");
                            return Err(PipelineError::source("live", reason));
                        }
                        warn!(frm, attempt, %reason, "Transient failure; backing off");
                        state = FetchState::Backoff { attempt };
                        debug!(state = ?state, frm, "Fetch state");
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.backoff_base_ms,
                            self.backoff_cap_ms,
                        ))
                        .await;
                        attempt += 1;
                    }
                }
            };

            let page_len = page.len();
            for record in page {
                // Ids already seen in this query are dropped from later pages
                if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }

            if page_len == 0 || page_len < size {
                break;
            }
            frm += size;
        }

        state = FetchState::Succeeded;
        debug!(state = ?state, "Fetch state machine finished");
        info!(window = %window, count = records.len(), "Live fetch complete");
        Ok(records)
    }

    async fn request_page(&self, window: &FetchWindow, frm: usize, size: usize) -> PageOutcome {
        let params = [
            ("date_received_min", window.start.format("%Y-%m-%d").to_string()),
            ("date_received_max", window.end.format("%Y-%m-%d").to_string()),
            ("no_aggs", "true".to_string()),
            ("no_highlight", "true".to_string()),
            ("has_narrative", "yes".to_string()),
            ("size", size.to_string()),
            ("frm", frm.to_string()),
        ];

        let response = match self.client.get(&self.base_url).query(&params).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return PageOutcome::Transient(format!("request failed: {}", e));
            }
            Err(e) => return PageOutcome::Fatal(format!("request failed: {}", e)),
        };

        match classify_status(response.status()) {
            StatusClass::Ok => {}
            StatusClass::EndOfPaging => return PageOutcome::EndOfPaging,
            StatusClass::RateLimited => return PageOutcome::RateLimited,
            StatusClass::Transient => {
                return PageOutcome::Transient(format!("server error: {}", response.status()));
            }
            StatusClass::Fatal => {
                return PageOutcome::Fatal(format!("client error: {}", response.status()));
            }
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return PageOutcome::Transient(format!("body read failed: {}", e)),
        };

        match parse_page(&body) {
            Ok(records) => PageOutcome::Records(records),
            Err(e) => PageOutcome::Fatal(format!("malformed response: {}", e)),
        }
    }
}

#[async_trait::async_trait]
impl LiveSource for LiveSourceClient {
    async fn fetch(
        &self,
        window: &FetchWindow,
        cancel: &CancelFlag,
    ) -> Result<Vec<ComplaintRecord>> {
        LiveSourceClient::fetch(self, window, cancel).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Ok,
    /// 400 at deep offsets means the API refuses further pages
    EndOfPaging,
    RateLimited,
    Transient,
    Fatal,
}

fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Ok
    } else if status == StatusCode::BAD_REQUEST {
        StatusClass::EndOfPaging
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::RateLimited
    } else if status.is_server_error() {
        StatusClass::Transient
    } else {
        StatusClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_bounded() {
        assert_eq!(backoff_delay(0, 500, 8_000), Duration::from_millis(500));
        assert_eq!(backoff_delay(1, 500, 8_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(3, 500, 8_000), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(10, 500, 8_000), Duration::from_millis(8_000));
        // Huge attempts must not overflow
        assert_eq!(backoff_delay(63, 500, 8_000), Duration::from_millis(8_000));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Ok);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::EndOfPaging);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Transient
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Fatal);
    }

    #[test]
    fn page_parsing_maps_source_fields() {
        let body = r#"{
            "hits": {
                "hits": [
                    {"_source": {
                        "complaint_id": "123",
                        "date_received": "2025-09-15T12:00:00",
                        "product": "Mortgage",
                        "issue": "Payment process",
                        "company": "Sample Bank",
                        "state": "CA",
                        "complaint_what_happened": "They lost my payment"
                    }},
                    {"_source": {
                        "complaint_id": "124",
                        "date_received": "not-a-date",
                        "product": "Mortgage",
                        "company": "Sample Bank"
                    }}
                ]
            }
        }"#;

        let records = parse_page(body).unwrap();
        // The malformed-date record is dropped, not an error
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "123");
        assert_eq!(
            record.date_received,
            NaiveDate::from_ymd_opt(2025, 9, 15).unwrap()
        );
        assert_eq!(record.provenance, Provenance::Live);
        assert!(record.has_narrative());
    }

    #[test]
    fn blank_narrative_becomes_none() {
        let body = r#"{
            "hits": {"hits": [{"_source": {
                "complaint_id": "1",
                "date_received": "2025-09-15",
                "product": "Mortgage",
                "company": "Sample Bank",
                "complaint_what_happened": "   "
            }}]}
        }"#;
        let records = parse_page(body).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].has_narrative());
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
