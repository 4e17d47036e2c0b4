//! Per-user rolling session windows
//!
//! Each user keeps at most `capacity` recent events, and nothing older than
//! the retention horizon is ever returned. Appends cap the window; the
//! background sweep is what actually drops stale events and empty windows.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use shoprec_common::{time, UserEvent};

/// Bounded, time-limited event history keyed by user id
pub struct SessionWindowStore {
    windows: RwLock<HashMap<String, VecDeque<UserEvent>>>,
    capacity: usize,
    retention: chrono::Duration,
}

/// Result of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub events_removed: usize,
    pub windows_removed: usize,
}

impl SessionWindowStore {
    /// Create a store holding `capacity` events per user for `retention`
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, dropping the oldest once the window is full
    pub async fn append(&self, user_id: &str, event: UserEvent) {
        let mut windows = self.windows.write().await;
        let window = windows.entry(user_id.to_string()).or_default();
        window.push_back(event);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    /// Most-recent-first events for a user, at most `limit`
    pub async fn recent(&self, user_id: &str, limit: usize) -> Vec<UserEvent> {
        self.recent_at(user_id, limit, time::now()).await
    }

    /// [`recent`](Self::recent) evaluated against an explicit clock
    pub async fn recent_at(&self, user_id: &str, limit: usize, now: DateTime<Utc>) -> Vec<UserEvent> {
        let cutoff = now - self.retention;
        let windows = self.windows.read().await;
        match windows.get(user_id) {
            Some(window) => window
                .iter()
                .rev()
                .filter(|event| event.timestamp >= cutoff)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remove events older than the retention horizon and delete empty windows
    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(time::now()).await
    }

    /// [`sweep`](Self::sweep) evaluated against an explicit clock
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let cutoff = now - self.retention;
        let mut stats = SweepStats::default();
        let mut windows = self.windows.write().await;

        windows.retain(|_, window| {
            let before = window.len();
            window.retain(|event| event.timestamp >= cutoff);
            stats.events_removed += before - window.len();
            if window.is_empty() {
                stats.windows_removed += 1;
                false
            } else {
                true
            }
        });

        debug!(
            events_removed = stats.events_removed,
            windows_removed = stats.windows_removed,
            "Session sweep complete"
        );
        stats
    }

    /// Number of users with a live window
    pub async fn user_count(&self) -> usize {
        self.windows.read().await.len()
    }
}
