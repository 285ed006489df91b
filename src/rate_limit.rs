//! Per-workspace request rate limiting.

use crate::error::{NlqError, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Checks between sweeps of idle workspaces.
const SWEEP_EVERY: u64 = 256;

/// Sliding-window limiter keyed by workspace id. Each check holds the
/// workspace's shard entry for the whole read-modify-write, so concurrent
/// requests for one workspace cannot both take the last slot.
#[derive(Debug)]
pub struct WorkspaceRateLimiter {
    limit: usize,
    window: Duration,
    hits: DashMap<i64, VecDeque<Instant>>,
    checks: AtomicU64,
}

impl Default for WorkspaceRateLimiter {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(60))
    }
}

impl WorkspaceRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, workspace_id: i64) -> Result<()> {
        self.check_at(workspace_id, Instant::now())
    }

    /// Record one request at `now`, failing if the window is already full.
    /// Rejected requests are not recorded.
    pub fn check_at(&self, workspace_id: i64, now: Instant) -> Result<()> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_at(now);
        }

        let mut hits = self.hits.entry(workspace_id).or_default();

        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.limit {
            warn!("Rate limit exceeded for workspace {}", workspace_id);
            return Err(NlqError::RateLimited { workspace_id });
        }
        hits.push_back(now);
        Ok(())
    }

    /// Drop workspaces whose newest hit has left the window.
    pub fn sweep_at(&self, now: Instant) {
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < self.window)
        });
    }

    /// Workspaces currently holding window state.
    pub fn tracked_workspaces(&self) -> usize {
        self.hits.len()
    }
}
