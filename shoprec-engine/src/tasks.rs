//! Background maintenance loops
//!
//! Two loops run for the life of the service: trending decay and the session
//! sweep (which also purges expired key-value entries). Both stop on the
//! shared cancellation token; a tick that has started runs to completion.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shoprec_common::KvStore;

use crate::session::SessionWindowStore;
use crate::trending::TrendingScoreTracker;

/// Handles to the running maintenance loops
pub struct BackgroundTasks {
    token: CancellationToken,
    decay: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Start the decay and sweep loops; first ticks fire one period from now
    pub fn spawn(
        trending: Arc<TrendingScoreTracker>,
        sessions: Arc<SessionWindowStore>,
        store: Arc<dyn KvStore>,
        decay_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let decay = tokio::spawn(decay_loop(trending, decay_interval, token.clone()));
        let sweep = tokio::spawn(sweep_loop(sessions, store, sweep_interval, token.clone()));
        info!(
            "Background tasks started (decay every {:?}, sweep every {:?})",
            decay_interval, sweep_interval
        );
        Self { token, decay, sweep }
    }

    /// Token observed by both loops
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel both loops and wait for them to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in [("decay", self.decay), ("sweep", self.sweep)] {
            if let Err(e) = handle.await {
                warn!("{} task ended abnormally: {}", name, e);
            }
        }
        info!("Background tasks stopped");
    }
}

async fn decay_loop(trending: Arc<TrendingScoreTracker>, period: Duration, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let dropped = trending.decay().await;
                debug!(dropped, "Trending decay tick");
            }
        }
    }
}

async fn sweep_loop(
    sessions: Arc<SessionWindowStore>,
    store: Arc<dyn KvStore>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let stats = sessions.sweep().await;
                let purged = match store.purge_expired().await {
                    Ok(purged) => purged,
                    Err(e) => {
                        warn!("Failed to purge expired entries: {}", e);
                        0
                    }
                };
                debug!(
                    events_removed = stats.events_removed,
                    windows_removed = stats.windows_removed,
                    purged,
                    "Session sweep tick"
                );
            }
        }
    }
}
