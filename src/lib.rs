//! Consumer Complaint Pipeline
//!
//! An acquisition and analysis pipeline for consumer complaint data that:
//! - Resolves its data sources from the environment at startup
//! - Layers a local snapshot cache under a shared queryable cache
//! - Pages through the live search API with retries and backoff
//! - Merges sources by record id, freshest provenance winning
//! - Filters, classifies, and ranks the resulting set deterministically
//!
//! PIPELINE:
//! RESOLVE → LOOK UP CACHES → FILL GAPS LIVE → MERGE → WRITE BACK →
//! FILTER → CLASSIFY → AGGREGATE → REPORT

pub mod aggregate;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod models;
pub mod policy;
pub mod report;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use aggregate::AggregationEngine;
pub use client::{CancelFlag, LiveSource, LiveSourceClient};
pub use config::PipelineConfig;
pub use coordinator::AcquisitionCoordinator;
pub use filter::{FilterConfig, FilterEngine};
pub use policy::FetchPolicy;
pub use report::TrendReport;
