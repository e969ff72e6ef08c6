//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::cluster::ClusterManager;
use crate::config::loader::load_config;
use crate::config::schema::FilterChainConfig;
use crate::routing::{RouteTable, SharedRouteTable};

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<FilterChainConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<FilterChainConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reload config: {}. Keeping current configuration.",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply a reloaded config to the shared lookups. Streams already holding a
/// cached route keep it until they clear their route cache.
pub fn apply_config(config: &FilterChainConfig, routes: &SharedRouteTable, clusters: &ClusterManager) {
    clusters.update(&config.clusters);
    routes.store(RouteTable::new(&config.routes));
}

/// Consume updates until the watcher goes away.
pub async fn apply_updates(
    mut updates: mpsc::UnboundedReceiver<FilterChainConfig>,
    routes: SharedRouteTable,
    clusters: std::sync::Arc<ClusterManager>,
) {
    while let Some(config) = updates.recv().await {
        apply_config(&config, &routes, &clusters);
    }
    tracing::debug!("Config update channel closed");
}
