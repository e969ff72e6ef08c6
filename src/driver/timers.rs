//! Per-stream timeout deadlines.
//!
//! # Design Decisions
//! - Deadlines, not sleeping tasks: the driver sleeps until the earliest one
//! - `tokio::time::Instant` so paused-clock tests control expiry

use std::time::Duration;

use tokio::time::Instant;

use crate::config::TimeoutConfig;

/// Which stream timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTimeout {
    Idle,
    Request,
    MaxDuration,
}

impl StreamTimeout {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamTimeout::Idle => "idle",
            StreamTimeout::Request => "request",
            StreamTimeout::MaxDuration => "max_duration",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamTimers {
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    request_deadline: Option<Instant>,
    max_duration_deadline: Option<Instant>,
}

impl StreamTimers {
    /// Arm every configured timer relative to `now`.
    pub fn new(config: &TimeoutConfig, now: Instant) -> Self {
        let idle_timeout = config.idle();
        Self {
            idle_timeout,
            idle_deadline: idle_timeout.map(|timeout| now + timeout),
            request_deadline: config.request().map(|timeout| now + timeout),
            max_duration_deadline: config.max_stream_duration().map(|timeout| now + timeout),
        }
    }

    /// Push the idle deadline out after stream activity.
    pub fn on_activity(&mut self, now: Instant) {
        if let Some(timeout) = self.idle_timeout {
            self.idle_deadline = Some(now + timeout);
        }
    }

    pub fn disarm_request(&mut self) {
        self.request_deadline = None;
    }

    pub fn request_armed(&self) -> bool {
        self.request_deadline.is_some()
    }

    /// The earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.idle_deadline, self.request_deadline, self.max_duration_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Disarm and return the earliest timer that has expired by `now`.
    pub fn take_expired(&mut self, now: Instant) -> Option<StreamTimeout> {
        let candidates = [
            (StreamTimeout::MaxDuration, self.max_duration_deadline),
            (StreamTimeout::Request, self.request_deadline),
            (StreamTimeout::Idle, self.idle_deadline),
        ];
        let (timeout, _) = candidates
            .into_iter()
            .filter_map(|(timeout, deadline)| deadline.map(|deadline| (timeout, deadline)))
            .filter(|(_, deadline)| *deadline <= now)
            .min_by_key(|(_, deadline)| *deadline)?;

        match timeout {
            StreamTimeout::Idle => self.idle_deadline = None,
            StreamTimeout::Request => self.request_deadline = None,
            StreamTimeout::MaxDuration => self.max_duration_deadline = None,
        }
        Some(timeout)
    }
}
