//! Leadership maintenance.
//!
//! One `LeaseKeeper` per engine process tries to hold the cluster-wide
//! engine lease, renewing on a cadence of half the TTL. Leadership is
//! published through a watch channel; the worker refuses to reconcile
//! without it, and an in-flight pass is stopped the moment it flips.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::registry::EngineLease;

pub struct LeaseKeeper {
    lease: EngineLease,
    renew_interval: Duration,
    leader_tx: watch::Sender<bool>,
}

impl LeaseKeeper {
    /// Create a keeper for `lease` with the given TTL. Returns the keeper
    /// and the channel on which leadership is published.
    pub fn new(lease: EngineLease, lease_ttl: Duration) -> (Self, watch::Receiver<bool>) {
        let (leader_tx, leader_rx) = watch::channel(false);
        (
            Self {
                lease,
                renew_interval: lease_ttl / 2,
                leader_tx,
            },
            leader_rx,
        )
    }

    /// Acquire and renew the lease until shutdown. The lease is released
    /// on the way out so a standby engine can take over immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            engine_id = %self.lease.id(),
            renew_interval_secs = self.renew_interval.as_secs(),
            "starting lease keeper"
        );

        let mut tick = tokio::time::interval(self.renew_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let held = *self.leader_tx.borrow();
                    let result = if held {
                        self.lease.renew().await
                    } else {
                        self.lease.acquire().await
                    };

                    match result {
                        Ok(holding) => {
                            if holding != held {
                                if holding {
                                    info!(engine_id = %self.lease.id(), "acquired engine leadership");
                                } else {
                                    warn!("engine leadership lost");
                                }
                                let _ = self.leader_tx.send(holding);
                            }
                        }
                        Err(error) => {
                            warn!(%error, "lease operation failed");
                            if held {
                                let _ = self.leader_tx.send(false);
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        if *self.leader_tx.borrow() {
                            self.lease.release().await;
                        }
                        info!("lease keeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
