//! Background removal of expired sessions.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::session::SessionStore;

pub struct SessionSweeper {
    store: SessionStore,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: SessionStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Session sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Remove expired sessions and return their connections to the pool.
    ///
    /// A session still locked by a request keeps its connection until that
    /// request's `finished` hands it back.
    pub async fn sweep_once(&self) -> usize {
        let removed = self.store.sweep_expired(Instant::now());
        let count = removed.len();
        for session in removed {
            if session.detach() {
                tracing::debug!(session = %session.token(), "Expired session is busy, leaving its connection");
                continue;
            }
            session.retire().await;
        }
        count
    }
}
