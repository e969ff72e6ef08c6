//! Filter chain construction.
//!
//! # Responsibilities
//! - Collect the filters of one stream in configured order
//! - Decide whether an upgrade request gets its own chain
//!
//! # Design Decisions
//! - A factory is shared by every stream; it builds fresh filter instances
//!   per stream and never hands out shared filter state
//! - A route's upgrade map overrides the factory default for that protocol

use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{StreamDecoderFilter, StreamEncoderFilter};

/// Ordered filter lists for a single stream.
#[derive(Default)]
pub struct FilterChainBuilder {
    decoder_filters: Vec<Box<dyn StreamDecoderFilter>>,
    encoder_filters: Vec<Box<dyn StreamEncoderFilter>>,
}

impl FilterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_decoder_filter(&mut self, filter: Box<dyn StreamDecoderFilter>) {
        self.decoder_filters.push(filter);
    }

    pub fn add_encoder_filter(&mut self, filter: Box<dyn StreamEncoderFilter>) {
        self.encoder_filters.push(filter);
    }

    pub fn decoder_count(&self) -> usize {
        self.decoder_filters.len()
    }

    pub fn encoder_count(&self) -> usize {
        self.encoder_filters.len()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Vec<Box<dyn StreamDecoderFilter>>, Vec<Box<dyn StreamEncoderFilter>>) {
        (self.decoder_filters, self.encoder_filters)
    }
}

impl std::fmt::Debug for FilterChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChainBuilder")
            .field("decoder_filters", &self.decoder_filters.iter().map(|f| f.name()).collect::<Vec<_>>())
            .field("encoder_filters", &self.encoder_filters.iter().map(|f| f.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Builds the filters of each new stream.
pub trait FilterChainFactory: Send + Sync {
    fn create_filter_chain(&self, builder: &mut FilterChainBuilder);

    /// Build the chain for an upgrade to `protocol`. Returns false to reject
    /// the upgrade; the stream then falls back to the default chain.
    fn create_upgrade_filter_chain(
        &self,
        _protocol: &str,
        _upgrade_map: Option<&HashMap<String, bool>>,
        _builder: &mut FilterChainBuilder,
    ) -> bool {
        false
    }
}

/// Adds one or more filters to a builder.
pub type FilterFactoryFn = Arc<dyn Fn(&mut FilterChainBuilder) + Send + Sync>;

struct UpgradeChain {
    enabled_by_default: bool,
    filters: Vec<FilterFactoryFn>,
}

/// A factory assembled from filter factory functions.
#[derive(Default)]
pub struct StaticFilterChainFactory {
    filters: Vec<FilterFactoryFn>,
    upgrades: HashMap<String, UpgradeChain>,
}

impl StaticFilterChainFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut FilterChainBuilder) + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(factory));
        self
    }

    /// Register an upgrade protocol. An empty `filters` list reuses the
    /// default chain.
    pub fn with_upgrade(
        mut self,
        protocol: &str,
        enabled_by_default: bool,
        filters: Vec<FilterFactoryFn>,
    ) -> Self {
        self.upgrades.insert(
            protocol.to_lowercase(),
            UpgradeChain {
                enabled_by_default,
                filters,
            },
        );
        self
    }
}

impl FilterChainFactory for StaticFilterChainFactory {
    fn create_filter_chain(&self, builder: &mut FilterChainBuilder) {
        for factory in &self.filters {
            factory(builder);
        }
    }

    fn create_upgrade_filter_chain(
        &self,
        protocol: &str,
        upgrade_map: Option<&HashMap<String, bool>>,
        builder: &mut FilterChainBuilder,
    ) -> bool {
        let protocol = protocol.to_lowercase();
        let Some(upgrade) = self.upgrades.get(&protocol) else {
            return false;
        };

        let enabled = upgrade_map
            .and_then(|map| map.get(&protocol).copied())
            .unwrap_or(upgrade.enabled_by_default);
        if !enabled {
            return false;
        }

        let filters = if upgrade.filters.is_empty() {
            &self.filters
        } else {
            &upgrade.filters
        };
        for factory in filters {
            factory(builder);
        }
        true
    }
}
