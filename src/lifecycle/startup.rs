//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from a validated config
//! - Build the shared route table and cluster map new streams resolve against
//! - Start the config watcher that keeps them current
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned, nothing is half-started
//! - Logging first, so later steps can report

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cluster::ClusterManager;
use crate::config::watcher::{apply_updates, ConfigWatcher};
use crate::config::FilterChainConfig;
use crate::observability::{logging, metrics};
use crate::routing::{RouteTable, SharedRouteTable};
use crate::stream::StreamTracker;

use super::Shutdown;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

/// Process-wide state shared by every stream.
pub struct Runtime {
    pub config: FilterChainConfig,
    pub routes: SharedRouteTable,
    pub clusters: Arc<ClusterManager>,
    pub tracker: StreamTracker,
    pub shutdown: Shutdown,
}

impl Runtime {
    /// Initialize logging and metrics, then build the shared lookups.
    pub fn start(config: FilterChainConfig) -> Result<Self, StartupError> {
        logging::init(&config.observability)?;

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_address
                .parse()
                .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
            metrics::init_metrics(addr)?;
        }

        let runtime = Self::from_config(config);
        tracing::info!(
            routes = runtime.routes.load().len(),
            clusters = runtime.clusters.len(),
            buffer_limit_bytes = runtime.config.stream.buffer_limit_bytes,
            "Filter chain runtime started"
        );
        Ok(runtime)
    }

    /// Build the shared lookups without touching global logging or metrics.
    pub fn from_config(config: FilterChainConfig) -> Self {
        let routes = SharedRouteTable::new(RouteTable::new(&config.routes));
        let clusters = Arc::new(ClusterManager::new(&config.clusters));
        Self {
            config,
            routes,
            clusters,
            tracker: StreamTracker::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Watch `path` and apply reloaded configs to the shared lookups. Keep
    /// the returned watcher alive for as long as reloads should happen.
    pub fn watch_config(&self, path: &Path) -> Result<(RecommendedWatcher, JoinHandle<()>), StartupError> {
        let (watcher, updates) = ConfigWatcher::new(path);
        let watcher = watcher.run()?;
        let task = tokio::spawn(apply_updates(updates, self.routes.clone(), Arc::clone(&self.clusters)));
        Ok((watcher, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterLookup;
    use crate::config::loader::parse_toml;

    #[test]
    fn test_from_config_builds_lookups() {
        let config = parse_toml(
            r#"
            [[clusters]]
            name = "api"

            [[routes]]
            name = "api"
            path_prefix = "/api"
            cluster = "api"
            "#,
        )
        .unwrap();

        let runtime = Runtime::from_config(config);
        assert_eq!(runtime.routes.load().len(), 1);
        assert!(runtime.clusters.get("api").is_some());
        assert_eq!(runtime.tracker.active_count(), 0);
    }
}
