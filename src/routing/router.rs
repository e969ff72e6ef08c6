//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for request headers
//! - Swap the whole table atomically on config reload
//!
//! # Design Decisions
//! - A compiled table is immutable (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit `None` rather than a silent default route

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::RouteConfig;
use crate::http::RequestHeaderMap;
use crate::stream::StreamInfo;

use super::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// Anything that can select a route for a request.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, headers: &RequestHeaderMap, info: &StreamInfo) -> Option<Arc<Route>>;
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    name: String,
    cluster: String,
    priority: u32,
    /// Upgrade protocol (lowercase) -> enabled.
    upgrade_map: HashMap<String, bool>,
    tracing_tags: Vec<(String, String)>,
    matcher: AndMatcher,
}

impl Route {
    /// A route that matches every request.
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            priority: 0,
            upgrade_map: HashMap::new(),
            tracing_tags: Vec::new(),
            matcher: AndMatcher::default(),
        }
    }

    pub fn from_config(config: &RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
        }
        Self {
            name: config.name.clone(),
            cluster: config.cluster.clone(),
            priority: config.priority,
            upgrade_map: config
                .upgrades
                .iter()
                .map(|(proto, enabled)| (proto.to_lowercase(), *enabled))
                .collect(),
            tracing_tags: config
                .tracing_tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            matcher: AndMatcher::new(matchers),
        }
    }

    pub fn with_upgrade(mut self, protocol: &str, enabled: bool) -> Self {
        self.upgrade_map.insert(protocol.to_lowercase(), enabled);
        self
    }

    pub fn with_tracing_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tracing_tags.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn upgrade_map(&self) -> &HashMap<String, bool> {
        &self.upgrade_map
    }

    pub fn tracing_tags(&self) -> &[(String, String)] {
        &self.tracing_tags
    }

    pub fn matches(&self, headers: &RequestHeaderMap) -> bool {
        self.matcher.matches(headers)
    }
}

/// Routes sorted by priority. First match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(configs: &[RouteConfig]) -> Self {
        Self::from_routes(configs.iter().map(Route::from_config).collect())
    }

    pub fn from_routes(mut routes: Vec<Route>) -> Self {
        // Higher priority first; stable sort keeps config order for ties.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn find(&self, headers: &RequestHeaderMap) -> Option<Arc<Route>> {
        let route = self.routes.iter().find(|r| r.matches(headers)).cloned();
        if route.is_none() {
            tracing::debug!(path = %headers.path(), host = ?headers.host(), "No route matched");
        }
        route
    }
}

impl RouteResolver for RouteTable {
    fn resolve(&self, headers: &RequestHeaderMap, _info: &StreamInfo) -> Option<Arc<Route>> {
        self.find(headers)
    }
}

/// A route table that can be replaced while streams keep resolving.
#[derive(Debug, Clone)]
pub struct SharedRouteTable {
    inner: Arc<ArcSwap<RouteTable>>,
}

impl SharedRouteTable {
    pub fn new(table: RouteTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// Replace the table. Lookups already in progress finish on the old one.
    pub fn store(&self, table: RouteTable) {
        tracing::info!(routes = table.len(), "Route table replaced");
        self.inner.store(Arc::new(table));
    }

    pub fn load(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }
}

impl Default for SharedRouteTable {
    fn default() -> Self {
        Self::new(RouteTable::default())
    }
}

impl RouteResolver for SharedRouteTable {
    fn resolve(&self, headers: &RequestHeaderMap, _info: &StreamInfo) -> Option<Arc<Route>> {
        self.inner.load().find(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::collections::BTreeMap;

    fn route(name: &str, host: Option<&str>, prefix: Option<&str>, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: host.map(String::from),
            path_prefix: prefix.map(String::from),
            cluster: format!("{}-cluster", name),
            priority,
            upgrades: BTreeMap::new(),
            tracing_tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_priority_order_first_match_wins() {
        let table = RouteTable::new(&[
            route("catch-all", None, Some("/"), 0),
            route("api", None, Some("/api"), 10),
        ]);
        let api = table.find(&RequestHeaderMap::new(Method::GET, "/api/users")).unwrap();
        assert_eq!(api.name(), "api");
        let other = table.find(&RequestHeaderMap::new(Method::GET, "/index.html")).unwrap();
        assert_eq!(other.name(), "catch-all");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new(&[route("a", Some("a.example"), None, 0)]);
        let headers = RequestHeaderMap::new(Method::GET, "/").with_authority("b.example");
        assert!(table.find(&headers).is_none());
    }

    #[test]
    fn test_upgrade_map_is_case_insensitive() {
        let mut config = route("ws", None, None, 0);
        config.upgrades.insert("WebSocket".into(), true);
        let route = Route::from_config(&config);
        assert_eq!(route.upgrade_map().get("websocket"), Some(&true));
    }

    #[test]
    fn test_shared_table_swap() {
        let shared = SharedRouteTable::new(RouteTable::new(&[route("old", None, None, 0)]));
        let headers = RequestHeaderMap::new(Method::GET, "/");
        let info = StreamInfo::new(crate::stream::StreamId::new());
        assert_eq!(shared.resolve(&headers, &info).unwrap().name(), "old");

        shared.store(RouteTable::new(&[route("new", None, None, 0)]));
        assert_eq!(shared.resolve(&headers, &info).unwrap().name(), "new");
    }
}
