use complaint_pipeline::{
    aggregate::{AggregationEngine, SecondaryStats},
    cache::{LocalCacheStore, PostgresRemoteCache, RecordCache},
    client::{CancelFlag, LiveSourceClient},
    config::PipelineConfig,
    coordinator::AcquisitionCoordinator,
    filter::{FilterConfig, FilterEngine},
    models::FetchWindow,
    policy::FetchPolicy,
    report::TrendReport,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = PipelineConfig::from_env()?;
    let months: u32 = std::env::args()
        .nth(1)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(config.months_window_max);
    let window = FetchWindow::months(months, config.months_window_max, Utc::now());

    info!("🚀 Consumer Complaint Pipeline");
    info!("📅 Window: {}", window);

    let policy = FetchPolicy::resolve(&config);

    let remote: Option<Arc<dyn RecordCache>> = match &config.remote_database_url {
        Some(url) if !config.live_only => match PostgresRemoteCache::connect(url).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Remote cache unavailable, continuing without it");
                None
            }
        },
        _ => None,
    };
    let local: Option<Arc<dyn RecordCache>> = if config.live_only {
        None
    } else {
        Some(Arc::new(LocalCacheStore::new(&config.data_dir)?))
    };
    let live = Arc::new(LiveSourceClient::new(&config)?);

    let coordinator = AcquisitionCoordinator::new(
        policy,
        remote,
        local,
        live,
        config.cache_ttl,
        std::time::Duration::from_secs(config.request_timeout_secs),
    );

    let cancel = CancelFlag::new();
    let records = coordinator.acquire(&window, &cancel).await?;
    info!("✅ Acquired {} records", records.len());

    let engine = FilterEngine::new(
        FilterConfig::from_pipeline(&config, window),
        &config.category_rules,
    )?;
    let classified = engine.run(records);

    let aggregator = AggregationEngine::new(
        10,
        config.divergence_threshold,
        SecondaryStats::published_2025(),
    );
    let trends = aggregator.top_trends(&classified.records);
    let sub_trends = aggregator.sub_trends(&classified.records, &trends);
    let companies = aggregator.company_rankings(&classified.records);
    let triangulation = aggregator.triangulate(&trends, classified.records.len());

    let report = TrendReport::new(window, classified, trends, sub_trends, companies, triangulation);

    println!();
    println!("📊 Top complaint trends ({})", report.window);
    for trend in &report.trends {
        println!(
            "  {:>2}. {:<60} {:>6} ({:.1}%)",
            trend.rank, trend.product, trend.count, trend.percentage
        );
    }

    println!();
    println!("🏦 Most-complained-about companies");
    for company in &report.companies {
        println!(
            "  {:>2}. {:<60} {:>6} ({:.1}%)",
            company.rank, company.company, company.count, company.percentage
        );
    }

    if !report.triangulation.is_empty() {
        println!();
        println!("🔍 Cross-source triangulation");
        for result in &report.triangulation {
            println!(
                "  {:<60} local {:>5.1}% vs secondary {:>5.1}%{}",
                result.category,
                result.local_share * 100.0,
                result.secondary_share * 100.0,
                if result.divergent { "  ⚠ divergent" } else { "" }
            );
        }
    }

    if report.warnings > 0 {
        warn!("{} records classified without a narrative", report.warnings);
    }
    info!("✅ Report complete: {} records", report.records.len());

    Ok(())
}
