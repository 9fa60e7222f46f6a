//! Filter and classification engine
//!
//! Applies the inclusion/exclusion predicates in a fixed, documented
//! order, then tags every surviving record against the declarative
//! category rule table. Rules are data; one generic matching routine
//! evaluates all of them.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{CategoryRule, ComplaintRecord, FetchWindow};
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

/// Company-name legal suffixes dropped during normalization when other
/// words precede them.
const LEGAL_SUFFIXES: &[&str] = &["INC", "LLC", "CORP", "CO", "LTD", "NA"];

/// Normalization contract for company names: uppercase, strip
/// punctuation, collapse whitespace, drop one trailing legal-suffix
/// token. Comparison after normalization is exact; no fuzzy matching.
pub fn normalize_company(name: &str) -> String {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '&' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() > 1 {
        if let Some(last) = tokens.last() {
            if LEGAL_SUFFIXES.contains(last) {
                tokens.pop();
            }
        }
    }
    // A dangling ampersand can be left behind by a dropped suffix
    if tokens.len() > 1 && tokens.last() == Some(&"&") {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Filtering parameters for one run.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub window: FetchWindow,
    pub require_narrative: bool,
    pub excluded_products: Vec<String>,
    pub excluded_companies: Vec<String>,
}

impl FilterConfig {
    pub fn from_pipeline(config: &PipelineConfig, window: FetchWindow) -> Self {
        Self {
            window,
            require_narrative: true,
            excluded_products: config.excluded_products.clone(),
            excluded_companies: config.excluded_companies.clone(),
        }
    }
}

/// Counters for everything the deterministic filter pass dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub out_of_window: usize,
    pub missing_narrative: usize,
    pub excluded_product: usize,
    pub excluded_company: usize,
    /// Records that skipped narrative-dependent classification because
    /// their narrative was missing or unusable (non-fatal)
    pub classification_warnings: usize,
}

/// Filtered, tagged output. An ephemeral per-query view; records are
/// immutable snapshots once they leave this engine.
#[derive(Debug)]
pub struct ClassifiedSet {
    pub records: Vec<ComplaintRecord>,
    pub stats: FilterStats,
}

struct CompiledRule {
    label: String,
    matchers: Vec<Regex>,
    match_issue_text: bool,
}

pub struct FilterEngine {
    config: FilterConfig,
    excluded_companies: HashSet<String>,
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    pub fn new(config: FilterConfig, rules: &[CategoryRule]) -> Result<Self> {
        let excluded_companies = config
            .excluded_companies
            .iter()
            .map(|c| normalize_company(c))
            .collect();

        let rules = rules
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            excluded_companies,
            rules,
        })
    }

    /// Filter then classify. Both passes are deterministic: the same
    /// input always yields identical drops and tag assignments.
    pub fn run(&self, records: Vec<ComplaintRecord>) -> ClassifiedSet {
        let mut stats = FilterStats::default();
        let mut kept: Vec<ComplaintRecord> = Vec::with_capacity(records.len());

        for record in records {
            // (a) date range
            if !self.config.window.contains(record.date_received) {
                stats.out_of_window += 1;
                continue;
            }
            // (b) narrative presence
            if self.config.require_narrative && !record.has_narrative() {
                stats.missing_narrative += 1;
                continue;
            }
            // (c) excluded products: exact category match, not substring
            if self
                .config
                .excluded_products
                .iter()
                .any(|p| p == &record.product)
            {
                stats.excluded_product += 1;
                continue;
            }
            // (d) excluded companies, compared after normalization
            if self
                .excluded_companies
                .contains(&normalize_company(&record.company))
            {
                stats.excluded_company += 1;
                continue;
            }
            kept.push(record);
        }

        for record in kept.iter_mut() {
            if !record.has_narrative() {
                // Reachable only when narratives are not required;
                // degraded, never an error
                stats.classification_warnings += 1;
            }
            for rule in &self.rules {
                if rule_matches(rule, record) {
                    record.add_tag(&rule.label);
                }
            }
        }

        info!(
            kept = kept.len(),
            out_of_window = stats.out_of_window,
            missing_narrative = stats.missing_narrative,
            excluded_product = stats.excluded_product,
            excluded_company = stats.excluded_company,
            "Filter pass complete"
        );
        debug!(rules = self.rules.len(), "Classification pass complete");

        ClassifiedSet { records: kept, stats }
    }
}

fn compile_rule(rule: &CategoryRule) -> Result<CompiledRule> {
    let matchers = rule
        .matchers
        .iter()
        .map(|phrase| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(phrase));
            Regex::new(&pattern).map_err(|e| {
                PipelineError::Config(format!(
                    "bad matcher '{}' in rule '{}': {}",
                    phrase, rule.label, e
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CompiledRule {
        label: rule.label.clone(),
        matchers,
        match_issue_text: rule.match_issue_text,
    })
}

/// A rule matches when any of its phrases appears word-bounded in the
/// narrative, or in issue / sub-issue text when the rule opts in.
fn rule_matches(rule: &CompiledRule, record: &ComplaintRecord) -> bool {
    let narrative = record.narrative.as_deref().unwrap_or("");
    rule.matchers.iter().any(|re| {
        re.is_match(narrative)
            || (rule.match_issue_text
                && (re.is_match(&record.issue) || re.is_match(&record.sub_issue)))
    })
}
