//! Engine background worker.
//!
//! Runs the reconciler on a periodic interval while this engine holds
//! leadership.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use super::reconciler::Reconciler;
use super::Engine;

pub struct EngineWorker {
    engine: Arc<Engine>,
    reconciler: Reconciler,
    interval: Duration,
}

impl EngineWorker {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Self {
            engine,
            reconciler: Reconciler::new(),
            interval,
        }
    }

    /// Run reconcile passes until shutdown is signaled.
    ///
    /// `leader` gates every pass; a pass already running is stopped when
    /// either shutdown fires or leadership flips away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, leader: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "starting engine worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't reconcile immediately on startup - wait for first interval.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !*leader.borrow() {
                        continue;
                    }
                    let stop = pass_stop(&shutdown, &leader);
                    self.reconciler.reconcile(&self.engine, &stop).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("engine worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Derive a single stop signal for one pass: fires on shutdown or on loss
/// of leadership, and winds down when the pass drops its receiver.
fn pass_stop(
    shutdown: &watch::Receiver<bool>,
    leader: &watch::Receiver<bool>,
) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    let mut shutdown = shutdown.clone();
    let mut leader = leader.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = tx.send(true);
                        break;
                    }
                }
                changed = leader.changed() => {
                    if changed.is_err() || !*leader.borrow() {
                        let _ = tx.send(true);
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pass_stop_fires_on_leadership_loss() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (leader_tx, leader_rx) = watch::channel(true);

        let mut stop = pass_stop(&shutdown_rx, &leader_rx);
        assert!(!*stop.borrow());

        leader_tx.send(false).unwrap();
        stop.changed().await.unwrap();
        assert!(*stop.borrow());
    }

    #[tokio::test]
    async fn test_pass_stop_fires_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_leader_tx, leader_rx) = watch::channel(true);

        let mut stop = pass_stop(&shutdown_rx, &leader_rx);
        shutdown_tx.send(true).unwrap();
        stop.changed().await.unwrap();
        assert!(*stop.borrow());
    }
}
