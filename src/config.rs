//! Pipeline configuration
//!
//! Every externally overridable knob lives here and is resolved from the
//! process environment exactly once at startup. Nothing else in the crate
//! reads environment variables.

use crate::models::CategoryRule;
use crate::Result;
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_API_BASE: &str =
    "https://www.consumerfinance.gov/data-research/consumer-complaints/search/api/v1/";
const DEFAULT_DETAIL_BASE: &str =
    "https://www.consumerfinance.gov/data-research/consumer-complaints/search/detail/";

/// Credit reporting product family, excluded by default to cut noise.
pub const DEFAULT_EXCLUDED_PRODUCTS: &[&str] = &[
    "Credit reporting, credit repair services, or other personal consumer reports",
    "Credit reporting",
    "Credit repair services",
    "Other personal consumer reports",
];

/// National credit bureau name variants, excluded from company rankings
/// by default.
pub const DEFAULT_EXCLUDED_COMPANIES: &[&str] = &[
    "EQUIFAX, INC.",
    "Equifax Information Services LLC",
    "Experian Information Solutions Inc.",
    "TransUnion Intermediate Holdings, Inc.",
];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_base_url: String,
    pub detail_base_url: String,
    pub data_dir: PathBuf,
    /// Maximum cache age before revalidation is required
    pub cache_ttl: Duration,
    /// Upper bound on the requested month window
    pub months_window_max: u32,
    pub page_size: usize,
    pub max_records: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub rate_limit_cooldown_secs: u64,
    pub excluded_products: Vec<String>,
    pub excluded_companies: Vec<String>,
    pub category_rules: Vec<CategoryRule>,
    /// Relative-share delta above which a triangulated category is flagged
    pub divergence_threshold: f64,
    /// Connection string for the shared remote cache, if configured
    pub remote_database_url: Option<String>,
    /// Skip caches entirely and fetch live
    pub live_only: bool,
}

impl PipelineConfig {
    /// Resolve configuration from the environment, falling back to
    /// defaults on anything missing or unparsable.
    pub fn from_env() -> Result<Self> {
        let rules = match env::var("CATEGORY_RULES_PATH") {
            Ok(path) => load_rules_file(&path)?,
            Err(_) => default_category_rules(),
        };

        Ok(Self {
            api_base_url: env_string("CFPB_SEARCH_API_BASE", DEFAULT_API_BASE),
            detail_base_url: env_string("COMPLAINT_DETAIL_BASE", DEFAULT_DETAIL_BASE),
            data_dir: PathBuf::from(env_string("DATA_DIR", "data")),
            cache_ttl: Duration::hours(env_parse("CACHE_TTL_HOURS", 168i64)),
            months_window_max: env_parse("MONTHS_WINDOW_MAX", 6u32).max(1),
            page_size: env_parse("PAGE_SIZE", 1000usize).max(1),
            max_records: env_parse("MAX_RECORDS", 5000usize).max(1),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 90u64),
            max_retries: env_parse("MAX_RETRIES", 3u32),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", 500u64),
            backoff_cap_ms: env_parse("BACKOFF_CAP_MS", 8_000u64),
            rate_limit_cooldown_secs: env_parse("RATE_LIMIT_COOLDOWN_SECS", 30u64),
            excluded_products: env_list("EXCLUDED_PRODUCTS", DEFAULT_EXCLUDED_PRODUCTS),
            excluded_companies: env_list("EXCLUDED_COMPANIES", DEFAULT_EXCLUDED_COMPANIES),
            category_rules: rules,
            divergence_threshold: env_parse("DIVERGENCE_THRESHOLD", 0.5f64),
            remote_database_url: env::var("REMOTE_DATABASE_URL").ok(),
            live_only: env_flag("LIVE_ONLY"),
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            detail_base_url: DEFAULT_DETAIL_BASE.to_string(),
            data_dir: PathBuf::from("data"),
            cache_ttl: Duration::hours(168),
            months_window_max: 6,
            page_size: 1000,
            max_records: 5000,
            request_timeout_secs: 90,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            rate_limit_cooldown_secs: 30,
            excluded_products: to_strings(DEFAULT_EXCLUDED_PRODUCTS),
            excluded_companies: to_strings(DEFAULT_EXCLUDED_COMPANIES),
            category_rules: default_category_rules(),
            divergence_threshold: 0.5,
            remote_database_url: None,
            live_only: false,
        }
    }
}

/// Built-in keyword rule sets. Overridable via `CATEGORY_RULES_PATH`
/// pointing at a JSON array of rules.
pub fn default_category_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            label: "AI/Algorithmic".to_string(),
            matchers: [
                "AI",
                "artificial intelligence",
                "algorithm",
                "algorithmic",
                "chatbot",
                "automated decision",
                "machine learning",
                "automated",
                "robo",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            match_issue_text: false,
        },
        CategoryRule {
            label: "Language Access".to_string(),
            matchers: [
                "Spanish",
                "LEP",
                "translation",
                "non-English",
                "interpreter",
                "bilingual",
                "language barrier",
                "limited English",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            match_issue_text: false,
        },
        CategoryRule {
            label: "Fraud/Digital".to_string(),
            matchers: [
                "fraud",
                "fraudulent",
                "scam",
                "scammer",
                "unauthorized",
                "Zelle",
                "digital wallet",
                "phishing",
                "identity theft",
                "account takeover",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            match_issue_text: true,
        },
    ]
}

fn load_rules_file(path: &str) -> Result<Vec<CategoryRule>> {
    let raw = std::fs::read_to_string(path)?;
    let rules: Vec<CategoryRule> = serde_json::from_str(&raw)?;
    if rules.is_empty() {
        return Err(crate::error::PipelineError::Config(format!(
            "category rules file '{}' contains no rules",
            path
        )));
    }
    Ok(rules)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => to_strings(default),
    }
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_credit_reporting_family() {
        let config = PipelineConfig::default();
        assert!(config
            .excluded_products
            .iter()
            .any(|p| p == "Credit reporting"));
        assert_eq!(config.months_window_max, 6);
        assert_eq!(config.cache_ttl, Duration::days(7));
    }

    #[test]
    fn default_rules_include_ai_category() {
        let rules = default_category_rules();
        let ai = rules.iter().find(|r| r.label == "AI/Algorithmic").unwrap();
        assert!(ai.matchers.iter().any(|m| m == "chatbot"));
    }

    #[test]
    fn rules_file_round_trips() {
        let json = serde_json::to_string(&default_category_rules()).unwrap();
        let parsed: Vec<CategoryRule> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 3);
    }
}
