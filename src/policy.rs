//! Environment Resolver
//!
//! Decides the source-priority policy once at startup from the resolved
//! configuration. The policy object is injected into the coordinator;
//! no environment-conditional branching happens anywhere else.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// The three data sources, in the abstract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    RemoteCache,
    LocalCache,
    Live,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::RemoteCache => "remote-cache",
            SourceKind::LocalCache => "local-cache",
            SourceKind::Live => "live",
        };
        write!(f, "{}", s)
    }
}

/// Source ordering policy for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Hosted deployments with a shared cache: remote, then local, then live
    RemoteCacheFirst,
    /// Standalone deployments: local snapshot, then live
    LocalCacheFirst,
    /// Caching disabled: straight to the API
    LiveOnly,
}

impl FetchPolicy {
    /// Pure function of configuration; evaluated once.
    pub fn resolve(config: &PipelineConfig) -> Self {
        let policy = if config.live_only {
            FetchPolicy::LiveOnly
        } else if config.remote_database_url.is_some() {
            FetchPolicy::RemoteCacheFirst
        } else {
            FetchPolicy::LocalCacheFirst
        };
        info!(policy = ?policy, "Resolved fetch policy");
        policy
    }

    /// Sources to try, cheapest sufficient first.
    pub fn source_order(&self) -> &'static [SourceKind] {
        match self {
            FetchPolicy::RemoteCacheFirst => &[
                SourceKind::RemoteCache,
                SourceKind::LocalCache,
                SourceKind::Live,
            ],
            FetchPolicy::LocalCacheFirst => &[SourceKind::LocalCache, SourceKind::Live],
            FetchPolicy::LiveOnly => &[SourceKind::Live],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_first_when_database_configured() {
        let config = PipelineConfig {
            remote_database_url: Some("postgres://cache".to_string()),
            ..PipelineConfig::default()
        };
        assert_eq!(FetchPolicy::resolve(&config), FetchPolicy::RemoteCacheFirst);
        assert_eq!(
            FetchPolicy::RemoteCacheFirst.source_order().first(),
            Some(&SourceKind::RemoteCache)
        );
    }

    #[test]
    fn local_first_by_default() {
        let config = PipelineConfig::default();
        assert_eq!(FetchPolicy::resolve(&config), FetchPolicy::LocalCacheFirst);
    }

    #[test]
    fn live_only_overrides_caches() {
        let config = PipelineConfig {
            live_only: true,
            remote_database_url: Some("postgres://cache".to_string()),
            ..PipelineConfig::default()
        };
        assert_eq!(FetchPolicy::resolve(&config), FetchPolicy::LiveOnly);
        assert_eq!(
            FetchPolicy::LiveOnly.source_order(),
            &[SourceKind::Live]
        );
    }
}
