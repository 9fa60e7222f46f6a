//! Aggregation engine
//!
//! Turns a filtered, classified record set into ranked summaries: top
//! product trends, sub-trends within each top product, company rankings,
//! and an advisory triangulation of local shares against published
//! secondary statistics. All rankings are deterministic: count
//! descending, ties broken by ascending name.

use crate::filter::normalize_company;
use crate::models::{
    ComplaintRecord, CompanyRanking, SubTrendSummary, TrendSummary, TriangulationResult,
};
use std::collections::HashMap;
use tracing::info;

const DEFAULT_TOP_N: usize = 10;

/// Local product category to secondary-source category names.
const CATEGORY_MAP: &[(&str, &[&str])] = &[
    (
        "Debt collection",
        &[
            "Debt Management/Credit Services",
            "Credit/Debt",
            "Debt Collection",
        ],
    ),
    (
        "Credit card or prepaid card",
        &["Credit Cards", "Prepaid Cards", "Banking/Credit"],
    ),
    (
        "Checking or savings account",
        &["Banking/Credit", "Online/Mobile Banking"],
    ),
    (
        "Mortgage",
        &["Mortgage/Real Estate", "Home Improvement", "Mortgage Lending"],
    ),
    (
        "Money transfer, virtual currency, or money service",
        &[
            "Wire Transfers",
            "Virtual Currency",
            "Money Services",
            "Cryptocurrency",
        ],
    ),
    ("Auto loan", &["Auto-Related", "Vehicle Sales/Leasing"]),
    ("Student loan", &["Education/Training", "Student Loans"]),
    ("Personal loan", &["Personal Loans", "Payday Loans"]),
    ("Payday loan", &["Payday Loans", "Short-term Lending"]),
];

/// Published secondary-source report volumes used for triangulation when
/// no detailed export is available. Consumer Sentinel Network annual
/// statistics, 2024-2025.
#[derive(Debug, Clone)]
pub struct SecondaryStats {
    pub total_reports: u64,
    pub categories: Vec<(String, u64)>,
}

impl SecondaryStats {
    pub fn published_2025() -> Self {
        let categories = [
            ("Identity Theft", 1_200_000u64),
            ("Imposter Scams", 900_000),
            ("Online Shopping/E-commerce", 400_000),
            ("Investment Related", 350_000),
            ("Tech Support", 300_000),
            ("Credit/Debt", 250_000),
            ("Banking/Credit", 200_000),
            ("Auto-Related", 150_000),
        ]
        .iter()
        .map(|(name, count)| (name.to_string(), *count))
        .collect();

        Self {
            total_reports: 5_700_000,
            categories,
        }
    }

    /// Match a mapped category name against the published table. The
    /// published labels are coarser than the mapping, so comparison uses
    /// the stem before any '/' and is case-insensitive.
    fn reports_for(&self, mapped: &str) -> Option<(String, u64)> {
        let stem = mapped.split('/').next().unwrap_or(mapped).to_lowercase();
        self.categories
            .iter()
            .find(|(name, _)| name.to_lowercase().contains(&stem))
            .map(|(name, count)| (name.clone(), *count))
    }
}

pub struct AggregationEngine {
    top_n: usize,
    divergence_threshold: f64,
    stats: SecondaryStats,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N, 0.5, SecondaryStats::published_2025())
    }
}

impl AggregationEngine {
    pub fn new(top_n: usize, divergence_threshold: f64, stats: SecondaryStats) -> Self {
        Self {
            top_n: top_n.max(1),
            divergence_threshold,
            stats,
        }
    }

    /// Top product categories by complaint volume.
    pub fn top_trends(&self, records: &[ComplaintRecord]) -> Vec<TrendSummary> {
        let total = records.len();
        let counted = count_by(records.iter().map(|r| r.product.clone()));

        rank(counted)
            .into_iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, (product, count))| TrendSummary {
                product,
                count,
                percentage: share_pct(count, total),
                rank: i + 1,
            })
            .collect()
    }

    /// Sub-trends inside each top product. Groups by sub-issue, falling
    /// back to issue when the sub-issue is empty.
    pub fn sub_trends(
        &self,
        records: &[ComplaintRecord],
        trends: &[TrendSummary],
    ) -> Vec<SubTrendSummary> {
        let mut out = Vec::new();
        for trend in trends {
            let within: Vec<&ComplaintRecord> = records
                .iter()
                .filter(|r| r.product == trend.product)
                .collect();
            let counted = count_by(within.iter().map(|r| {
                if r.sub_issue.trim().is_empty() {
                    r.issue.clone()
                } else {
                    r.sub_issue.clone()
                }
            }));

            out.extend(
                rank(counted)
                    .into_iter()
                    .take(self.top_n)
                    .enumerate()
                    .map(|(i, (label, count))| SubTrendSummary {
                        parent: trend.product.clone(),
                        label,
                        count,
                        percentage: share_pct(count, within.len()),
                        rank: i + 1,
                    }),
            );
        }
        out
    }

    /// Companies ranked by volume, grouped by normalized name. The
    /// display label is the raw name of the first record seen for the
    /// group.
    pub fn company_rankings(&self, records: &[ComplaintRecord]) -> Vec<CompanyRanking> {
        let total = records.len();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut display: HashMap<String, String> = HashMap::new();

        for record in records {
            let normalized = normalize_company(&record.company);
            *counts.entry(normalized.clone()).or_default() += 1;
            display
                .entry(normalized)
                .or_insert_with(|| record.company.clone());
        }

        rank(counts)
            .into_iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, (normalized, count))| CompanyRanking {
                company: display
                    .get(&normalized)
                    .cloned()
                    .unwrap_or_else(|| normalized.clone()),
                normalized,
                count,
                percentage: share_pct(count, total),
                rank: i + 1,
            })
            .collect()
    }

    /// Cross-reference local trend shares against the secondary source.
    /// Advisory only: a divergent flag never fails the run. Categories
    /// with no mapping or no published match are skipped.
    pub fn triangulate(
        &self,
        trends: &[TrendSummary],
        total_records: usize,
    ) -> Vec<TriangulationResult> {
        let mut out = Vec::new();
        if total_records == 0 || self.stats.total_reports == 0 {
            return out;
        }

        for trend in trends {
            let Some((_, mapped)) = CATEGORY_MAP
                .iter()
                .find(|(product, _)| *product == trend.product)
            else {
                continue;
            };

            let mut secondary_categories = Vec::new();
            let mut secondary_reports = 0u64;
            for category in *mapped {
                if let Some((name, reports)) = self.stats.reports_for(category) {
                    if !secondary_categories.contains(&name) {
                        secondary_reports += reports;
                        secondary_categories.push(name);
                    }
                }
            }
            if secondary_categories.is_empty() {
                continue;
            }

            let local_share = trend.count as f64 / total_records as f64;
            let secondary_share =
                secondary_reports as f64 / self.stats.total_reports as f64;
            let delta = local_share - secondary_share;
            let divergent =
                delta.abs() / local_share.max(secondary_share) > self.divergence_threshold;

            out.push(TriangulationResult {
                category: trend.product.clone(),
                secondary_categories,
                local_share,
                secondary_share,
                delta,
                divergent,
            });
        }

        info!(
            categories = out.len(),
            divergent = out.iter().filter(|t| t.divergent).count(),
            "Triangulation complete"
        );
        out
    }
}

fn count_by(keys: impl Iterator<Item = String>) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    counts
}

/// Count descending, ties by ascending name. Stable across runs for
/// identical inputs.
fn rank(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

fn share_pct(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::sample_record;

    fn records(products: &[&str]) -> Vec<ComplaintRecord> {
        products
            .iter()
            .enumerate()
            .map(|(i, product)| {
                let mut r = sample_record(&format!("r{i}"));
                r.product = product.to_string();
                r
            })
            .collect()
    }

    #[test]
    fn trends_rank_by_count_then_name() {
        let records = records(&[
            "Mortgage",
            "Mortgage",
            "Auto loan",
            "Auto loan",
            "Payday loan",
        ]);
        let trends = AggregationEngine::default().top_trends(&records);

        assert_eq!(trends[0].product, "Auto loan");
        assert_eq!(trends[0].rank, 1);
        assert_eq!(trends[1].product, "Mortgage");
        assert_eq!(trends[2].product, "Payday loan");
        assert!((trends[0].percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn top_n_limits_trend_list() {
        let records = records(&["A", "B", "C", "D"]);
        let engine = AggregationEngine::new(2, 0.5, SecondaryStats::published_2025());
        assert_eq!(engine.top_trends(&records).len(), 2);
    }

    #[test]
    fn sub_trends_fall_back_to_issue() {
        let mut a = sample_record("a");
        a.product = "Mortgage".to_string();
        a.sub_issue = String::new();
        a.issue = "Trouble during payment process".to_string();
        let mut b = sample_record("b");
        b.product = "Mortgage".to_string();
        b.sub_issue = "Escrow".to_string();

        let engine = AggregationEngine::default();
        let trends = engine.top_trends(&[a.clone(), b.clone()]);
        let subs = engine.sub_trends(&[a, b], &trends);

        let labels: Vec<&str> = subs.iter().map(|s| s.label.as_str()).collect();
        assert!(labels.contains(&"Trouble during payment process"));
        assert!(labels.contains(&"Escrow"));
        assert!(subs.iter().all(|s| s.parent == "Mortgage"));
    }

    #[test]
    fn companies_group_by_normalized_name() {
        let mut a = sample_record("a");
        a.company = "ACME Bank, Inc.".to_string();
        let mut b = sample_record("b");
        b.company = "ACME BANK INC".to_string();
        let mut c = sample_record("c");
        c.company = "Other Bank".to_string();

        let rankings = AggregationEngine::default().company_rankings(&[a, b, c]);

        assert_eq!(rankings[0].normalized, "ACME BANK");
        assert_eq!(rankings[0].company, "ACME Bank, Inc.");
        assert_eq!(rankings[0].count, 2);
        assert_eq!(rankings[1].company, "Other Bank");
    }

    #[test]
    fn triangulation_maps_known_categories() {
        let records = records(&[
            "Checking or savings account",
            "Checking or savings account",
            "Unmapped product",
        ]);
        let engine = AggregationEngine::default();
        let trends = engine.top_trends(&records);
        let results = engine.triangulate(&trends, records.len());

        assert_eq!(results.len(), 1);
        let banking = &results[0];
        assert_eq!(banking.category, "Checking or savings account");
        assert!(banking
            .secondary_categories
            .contains(&"Banking/Credit".to_string()));
        assert!(banking.local_share > 0.0 && banking.local_share < 1.0);
        assert!(banking.secondary_share > 0.0);
    }

    #[test]
    fn divergence_flag_respects_threshold() {
        let records = records(&["Auto loan"]);
        let trends = AggregationEngine::default().top_trends(&records);

        // local share 1.0 vs a tiny secondary share diverges hard
        let strict = AggregationEngine::new(10, 0.1, SecondaryStats::published_2025());
        let results = strict.triangulate(&trends, 1);
        assert_eq!(results.len(), 1);
        assert!(results[0].divergent);

        let lax = AggregationEngine::new(10, 2.0, SecondaryStats::published_2025());
        assert!(lax.triangulate(&trends, 1).iter().all(|t| !t.divergent));
    }

    #[test]
    fn excluded_products_never_reach_the_trend_list() {
        use crate::config::PipelineConfig;
        use crate::filter::{FilterConfig, FilterEngine};
        use crate::models::FetchWindow;
        use chrono::NaiveDate;

        let config = PipelineConfig::default();
        let window = FetchWindow::explicit(
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
        );
        let engine =
            FilterEngine::new(FilterConfig::from_pipeline(&config, window), &config.category_rules)
                .unwrap();

        let mut excluded = sample_record("1");
        excluded.product = "Credit reporting".to_string();
        let kept = sample_record("2");

        let classified = engine.run(vec![excluded, kept]);
        let trends = AggregationEngine::default().top_trends(&classified.records);

        assert!(trends.iter().all(|t| t.product != "Credit reporting"));
        assert_eq!(trends.len(), 1);
    }

    #[test]
    fn empty_input_yields_empty_summaries() {
        let engine = AggregationEngine::default();
        assert!(engine.top_trends(&[]).is_empty());
        assert!(engine.company_rankings(&[]).is_empty());
        assert!(engine.triangulate(&[], 0).is_empty());
    }
}
