//! Cluster lookup.
//!
//! # Responsibilities
//! - Hold the known upstream clusters by name
//! - Resolve a route's cluster name to shared cluster info
//! - Replace cluster definitions on config reload
//!
//! # Design Decisions
//! - Cluster info is immutable and shared via `Arc`; a reload replaces entries
//! - DashMap so lookups from many streams never contend on a single lock

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::ClusterConfig;

/// What a stream can learn about the upstream cluster of its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub connect_timeout: Duration,
    pub max_requests: u32,
}

impl ClusterInfo {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            name: config.name.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            max_requests: config.max_requests,
        }
    }
}

/// Resolve a cluster name.
pub trait ClusterLookup: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<ClusterInfo>>;
}

/// Concurrent cluster registry.
#[derive(Debug, Default)]
pub struct ClusterManager {
    clusters: DashMap<String, Arc<ClusterInfo>>,
}

impl ClusterManager {
    pub fn new(configs: &[ClusterConfig]) -> Self {
        let manager = Self::default();
        for config in configs {
            manager.insert(ClusterInfo::from_config(config));
        }
        manager
    }

    pub fn insert(&self, info: ClusterInfo) {
        self.clusters.insert(info.name.clone(), Arc::new(info));
    }

    /// Replace every cluster with the given definitions.
    pub fn update(&self, configs: &[ClusterConfig]) {
        self.clusters
            .retain(|name, _| configs.iter().any(|c| &c.name == name));
        for config in configs {
            self.insert(ClusterInfo::from_config(config));
        }
        tracing::info!(clusters = self.clusters.len(), "Clusters updated");
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterLookup for ClusterManager {
    fn get(&self, name: &str) -> Option<Arc<ClusterInfo>> {
        let found = self.clusters.get(name).map(|entry| Arc::clone(entry.value()));
        if found.is_none() {
            tracing::debug!(cluster = %name, "Cluster not found");
        }
        found
    }
}
