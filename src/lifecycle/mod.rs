//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Route table + clusters → Watcher
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Trigger → Drivers reset their streams → Drain tracker
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: logging first, then shared lookups, then the watcher
//! - Shutdown has a grace period: live streams are abandoned after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{wait_for_shutdown_signal, ShutdownSignal};
pub use startup::{Runtime, StartupError};
