//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request headers (host, path)
//!     → router.rs (route lookup, called lazily by the stream)
//!     → matcher.rs (evaluate match conditions)
//!     → Some(Arc<Route>) or None, cached on the stream until cleared
//!
//! Route compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Swap into SharedRouteTable
//! ```
//!
//! # Design Decisions
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)
//! - A route also carries what the stream derives from it: upgrade map and
//!   tracing tags

pub mod matcher;
pub mod router;

pub use router::{Route, RouteResolver, RouteTable, SharedRouteTable};
