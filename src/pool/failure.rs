//! Failure policies: deciding when repeated errors kill a node.

use crate::config::FailurePolicyConfig;
use crate::types::Endpoint;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Decides whether an observed failure should trip a node Dead.
///
/// State is keyed by node endpoint so one policy instance serves the
/// whole server pool.
pub trait FailurePolicy: Send + Sync {
    /// Record one failure. Returns true when the node should be
    /// declared Dead.
    fn record_failure(&self, endpoint: &Endpoint) -> bool;

    /// Record a successful operation, clearing accumulated failures.
    fn record_success(&self, endpoint: &Endpoint);
}

/// Policy that never trips a node.
#[derive(Debug, Default)]
pub struct NoFailurePolicy;

impl FailurePolicy for NoFailurePolicy {
    fn record_failure(&self, _endpoint: &Endpoint) -> bool {
        false
    }

    fn record_success(&self, _endpoint: &Endpoint) {}
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Counts failures within a sliding window and trips the node when the
/// threshold is reached. The counter restarts whenever the window
/// expires or an operation succeeds.
#[derive(Debug)]
pub struct ThrottlingFailurePolicy {
    failure_threshold: u32,
    reset_after: Duration,
    windows: DashMap<Endpoint, Window>,
}

impl ThrottlingFailurePolicy {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_after,
            windows: DashMap::new(),
        }
    }
}

impl FailurePolicy for ThrottlingFailurePolicy {
    fn record_failure(&self, endpoint: &Endpoint) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry(endpoint.clone()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(window.started) > self.reset_after {
            window.count = 0;
            window.started = now;
        }
        window.count += 1;
        debug!(
            endpoint = %endpoint,
            failures = window.count,
            threshold = self.failure_threshold,
            "node failure recorded"
        );
        if window.count >= self.failure_threshold {
            window.count = 0;
            window.started = now;
            true
        } else {
            false
        }
    }

    fn record_success(&self, endpoint: &Endpoint) {
        self.windows.remove(endpoint);
    }
}

/// Build the policy selected by configuration.
pub(crate) fn make_policy(config: &FailurePolicyConfig) -> Arc<dyn FailurePolicy> {
    match config {
        FailurePolicyConfig::None => Arc::new(NoFailurePolicy),
        FailurePolicyConfig::Throttling {
            failure_threshold,
            reset_after,
        } => Arc::new(ThrottlingFailurePolicy::new(*failure_threshold, *reset_after)),
    }
}
