//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing clusters)
//! - Validate value shapes (path prefixes, metrics address)
//! - Detect duplicate names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FilterChainConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::FilterChainConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("route #{index} has an empty name")]
    EmptyRouteName { index: usize },

    #[error("duplicate route name '{0}'")]
    DuplicateRoute(String),

    #[error("route '{route}' references unknown cluster '{cluster}'")]
    UnknownCluster { route: String, cluster: String },

    #[error("route '{route}' path prefix '{prefix}' must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("duplicate cluster name '{0}'")]
    DuplicateCluster(String),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &FilterChainConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut clusters = HashSet::new();
    for cluster in &config.clusters {
        if !clusters.insert(cluster.name.as_str()) {
            errors.push(ValidationError::DuplicateCluster(cluster.name.clone()));
        }
    }

    let mut routes = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        if route.name.is_empty() {
            errors.push(ValidationError::EmptyRouteName { index });
        } else if !routes.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }

        if !clusters.contains(route.cluster.as_str()) {
            errors.push(ValidationError::UnknownCluster {
                route: route.name.clone(),
                cluster: route.cluster.clone(),
            });
        }

        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPathPrefix {
                    route: route.name.clone(),
                    prefix: prefix.clone(),
                });
            }
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, RouteConfig};

    fn route(name: &str, cluster: &str, prefix: Option<&str>) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: None,
            path_prefix: prefix.map(String::from),
            cluster: cluster.into(),
            priority: 0,
            upgrades: Default::default(),
            tracing_tags: Default::default(),
        }
    }

    fn cluster(name: &str) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            connect_timeout_ms: 1000,
            max_requests: 10,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&FilterChainConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = FilterChainConfig::default();
        config.clusters = vec![cluster("web"), cluster("web")];
        config.routes = vec![
            route("a", "web", Some("/a")),
            route("a", "missing", Some("nope")),
            route("", "web", None),
        ];
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateCluster("web".into())));
        assert!(errors.contains(&ValidationError::DuplicateRoute("a".into())));
        assert!(errors.contains(&ValidationError::UnknownCluster {
            route: "a".into(),
            cluster: "missing".into()
        }));
        assert!(errors.contains(&ValidationError::InvalidPathPrefix {
            route: "a".into(),
            prefix: "nope".into()
        }));
        assert!(errors.contains(&ValidationError::EmptyRouteName { index: 2 }));
        assert!(errors.contains(&ValidationError::InvalidMetricsAddress("not-an-address".into())));
        assert_eq!(errors.len(), 6);
    }
}
