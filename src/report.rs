//! Report assembly
//!
//! Bundles one acquisition-and-analysis run into a single artifact and
//! provides the presentation helpers the summary views need: fixed page
//! sizes, a pagination helper, and per-record detail links.

use crate::filter::ClassifiedSet;
use crate::models::{
    detail_url, ComplaintRecord, CompanyRanking, FetchWindow, SubTrendSummary, TrendSummary,
    TriangulationResult,
};
use serde::Serialize;

/// Page size choices offered by the summary views. `None` means all
/// records on one page.
pub const PAGE_SIZES: &[Option<usize>] = &[
    Some(10),
    Some(25),
    Some(50),
    Some(100),
    Some(200),
    Some(500),
    Some(1000),
    None,
];

/// Everything one pipeline run produces, ready for rendering or export.
#[derive(Debug, Serialize)]
pub struct TrendReport {
    pub window: FetchWindow,
    pub records: Vec<ComplaintRecord>,
    pub trends: Vec<TrendSummary>,
    pub sub_trends: Vec<SubTrendSummary>,
    pub companies: Vec<CompanyRanking>,
    pub triangulation: Vec<TriangulationResult>,
    /// Non-fatal classification warnings accumulated during the run
    pub warnings: usize,
}

impl TrendReport {
    pub fn new(
        window: FetchWindow,
        classified: ClassifiedSet,
        trends: Vec<TrendSummary>,
        sub_trends: Vec<SubTrendSummary>,
        companies: Vec<CompanyRanking>,
        triangulation: Vec<TriangulationResult>,
    ) -> Self {
        Self {
            window,
            warnings: classified.stats.classification_warnings,
            records: classified.records,
            trends,
            sub_trends,
            companies,
            triangulation,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One page of records at the given size. A `None` size returns the
    /// whole set as page zero; an out-of-range index returns an empty
    /// slice rather than an error.
    pub fn page(&self, size: Option<usize>, index: usize) -> &[ComplaintRecord] {
        page(&self.records, size, index)
    }

    /// Record views for one page, each carrying its public detail link.
    pub fn page_views<'a>(
        &'a self,
        detail_base_url: &str,
        size: Option<usize>,
        index: usize,
    ) -> Vec<RecordView<'a>> {
        self.page(size, index)
            .iter()
            .map(|record| RecordView {
                record,
                detail_url: detail_url(detail_base_url, &record.id),
            })
            .collect()
    }
}

/// A record paired with the URL of its full public detail page.
#[derive(Debug, Serialize)]
pub struct RecordView<'a> {
    pub record: &'a ComplaintRecord,
    pub detail_url: String,
}

pub fn page(records: &[ComplaintRecord], size: Option<usize>, index: usize) -> &[ComplaintRecord] {
    match size {
        None => {
            if index == 0 {
                records
            } else {
                &[]
            }
        }
        Some(0) => &[],
        Some(size) => {
            let start = index.saturating_mul(size);
            if start >= records.len() {
                return &[];
            }
            let end = (start + size).min(records.len());
            &records[start..end]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::sample_record;

    fn records(n: usize) -> Vec<ComplaintRecord> {
        (0..n).map(|i| sample_record(&format!("r{i:03}"))).collect()
    }

    #[test]
    fn page_sizes_match_the_ui_options() {
        assert_eq!(PAGE_SIZES.len(), 8);
        assert_eq!(PAGE_SIZES[0], Some(10));
        assert_eq!(PAGE_SIZES[7], None);
    }

    #[test]
    fn paging_slices_without_overlap() {
        let records = records(25);
        let first = page(&records, Some(10), 0);
        let second = page(&records, Some(10), 1);
        let third = page(&records, Some(10), 2);

        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);
        assert_eq!(third.len(), 5);
        assert_ne!(first[9].id, second[0].id);
    }

    #[test]
    fn out_of_range_page_is_empty() {
        let records = records(5);
        assert!(page(&records, Some(10), 3).is_empty());
        assert!(page(&records, None, 1).is_empty());
    }

    #[test]
    fn all_size_returns_everything() {
        let records = records(12);
        assert_eq!(page(&records, None, 0).len(), 12);
    }

    #[test]
    fn record_views_carry_detail_urls() {
        let report = TrendReport {
            window: FetchWindow::explicit(
                chrono::NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                chrono::NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            ),
            records: records(2),
            trends: vec![],
            sub_trends: vec![],
            companies: vec![],
            triangulation: vec![],
            warnings: 0,
        };

        let views = report.page_views("https://example.gov/detail/", Some(10), 0);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].detail_url, "https://example.gov/detail/r000");
    }
}
