//! Background shard health monitoring
//!
//! Periodically probes every shard and maintains advisory status:
//! a failed probe demotes an `Active` shard to `Maintenance`, a later
//! successful probe promotes it back. Only shards the monitor itself
//! demoted are ever promoted, so an operator-set `Maintenance` sticks
//! until the operator clears it. Routing is never changed here.

use crate::config::{FailureAction, HealthConfig};
use crate::manager::ShardManager;
use crate::metrics;
use crate::types::{Region, ShardStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status transition observed by the health loop
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub shard_id: String,
    pub region: Region,
    pub from: ShardStatus,
    pub to: ShardStatus,
    pub reason: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

pub struct HealthMonitor {
    manager: Arc<ShardManager>,
    config: HealthConfig,
    running: AtomicBool,
    shutdown: Notify,
    event_tx: broadcast::Sender<HealthEvent>,
    demoted: parking_lot::Mutex<HashSet<String>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ShardManager>, config: HealthConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            manager,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            event_tx,
            demoted: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Receive status transitions as the monitor observes them
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the probe loop. The first sweep runs immediately.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.check_interval());
            info!(
                interval_secs = monitor.config.check_interval_secs,
                "health monitor started"
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !monitor.running.load(Ordering::SeqCst) {
                            break;
                        }
                        monitor.check_all_shards().await;
                    }
                    _ = monitor.shutdown.notified() => break,
                }
            }
            info!("health monitor stopped");
        })
    }

    /// Request shutdown. `notify_one` stores a permit, so a stop that
    /// lands while the loop is mid-sweep is consumed at the next await
    /// instead of being lost until the following tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Probe every shard once. Public so operators can force a sweep.
    pub async fn check_all_shards(&self) {
        for shard in self.manager.snapshot().await {
            let healthy = match self.manager.ping_shard(&shard.shard_id).await {
                Ok(()) => true,
                Err(err) => {
                    debug!(shard_id = %shard.shard_id, error = %err, "health probe failed");
                    false
                }
            };
            self.handle_probe(&shard.shard_id, healthy).await;
        }
    }

    async fn handle_probe(&self, shard_id: &str, healthy: bool) {
        let Some(info) = self.manager.shard_info(shard_id).await else {
            return;
        };
        // A failed probe can race shard removal; ignore the stamp error.
        let _ = self.manager.mark_health_checked(shard_id).await;

        if !healthy && info.status == ShardStatus::Active {
            self.transition(
                shard_id,
                info.region,
                info.status,
                ShardStatus::Maintenance,
                "health probe failed",
            )
            .await;
            self.demoted.lock().insert(shard_id.to_string());
            match self.config.on_failure {
                FailureAction::AlertOnly => {
                    warn!(shard_id, "shard unhealthy; alerting only");
                }
                FailureAction::Rebalance => {
                    warn!(shard_id, "shard unhealthy; rebalance requested");
                }
                FailureAction::Manual => {
                    warn!(shard_id, "shard unhealthy; waiting for operator");
                }
            }
        } else if healthy
            && info.status == ShardStatus::Maintenance
            && self.demoted.lock().remove(shard_id)
        {
            self.transition(
                shard_id,
                info.region,
                info.status,
                ShardStatus::Active,
                "health probe recovered",
            )
            .await;
        }
    }

    async fn transition(
        &self,
        shard_id: &str,
        region: Region,
        from: ShardStatus,
        to: ShardStatus,
        reason: &str,
    ) {
        if let Err(err) = self.manager.set_shard_status(shard_id, to).await {
            warn!(shard_id, error = %err, "status transition failed");
            return;
        }
        metrics::record_health_transition(shard_id, from.as_str(), to.as_str());
        let _ = self.event_tx.send(HealthEvent {
            shard_id: shard_id.to_string(),
            region,
            from,
            to,
            reason: reason.to_string(),
            at: chrono::Utc::now(),
        });
    }
}
