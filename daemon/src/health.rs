//! Health aggregation (§12 supplemental) -- receiver/batcher/backend
//! worst-of snapshot, logged periodically and exposed as a Prometheus
//! gauge. There is no health-check RPC; `spec.md` names none.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use syslogd_core::backend::HealthStatus;
use syslogd_ingest::BatcherHandle;

/// Daemon-wide health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Health of one of the three ingestion-pipeline roles.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
}

/// Worst-of aggregation across components: Unhealthy > Degraded > Healthy.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    components
        .iter()
        .map(|c| c.status.clone())
        .fold(HealthStatus::Healthy, HealthStatus::worse_of)
}

/// Shared flag the receiver task flips right before it returns, so health
/// assessment can tell a clean stop from a still-running receiver.
#[derive(Clone)]
pub struct ReceiverAlive(Arc<AtomicBool>);

impl ReceiverAlive {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn mark_stopped(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    fn is_alive(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ReceiverAlive {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a point-in-time health snapshot from the batcher's queue
/// utilization and the receiver's aliveness flag (aggregated from receiver
/// socket state + batcher queue utilization + backend last-write outcome).
pub fn assess(
    batcher: &BatcherHandle,
    receiver: &ReceiverAlive,
    queue_capacity: usize,
    batch_errors: u64,
    started_at: Instant,
) -> DaemonHealth {
    let receiver_status = if receiver.is_alive() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy("receiver task has stopped".to_owned())
    };

    let depth = batcher.queue_depth();
    let utilization = if queue_capacity == 0 {
        0.0
    } else {
        depth as f64 / queue_capacity as f64
    };
    let queue_status = if utilization >= 0.95 {
        HealthStatus::Unhealthy(format!("queue at {depth}/{queue_capacity}"))
    } else if utilization >= 0.75 {
        HealthStatus::Degraded(format!("queue at {depth}/{queue_capacity}"))
    } else {
        HealthStatus::Healthy
    };

    let backend_status = if batch_errors > 0 {
        HealthStatus::Degraded(format!("{batch_errors} batch(es) dropped since start"))
    } else {
        HealthStatus::Healthy
    };

    let components = vec![
        ComponentHealth { name: "receiver", status: receiver_status },
        ComponentHealth { name: "batcher_queue", status: queue_status },
        ComponentHealth { name: "backend", status: backend_status },
    ];
    let status = aggregate_status(&components);

    DaemonHealth {
        status,
        uptime_secs: started_at.elapsed().as_secs(),
        components,
    }
}

/// Spawns a task that periodically logs the aggregated health snapshot and
/// mirrors it onto a Prometheus gauge, until `cancel` fires.
pub fn spawn_periodic_report(
    interval: Duration,
    batcher: BatcherHandle,
    receiver: ReceiverAlive,
    queue_capacity: usize,
    batch_errors: Arc<AtomicU64>,
    started_at: Instant,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("health report task stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let snapshot = assess(
                        &batcher,
                        &receiver,
                        queue_capacity,
                        batch_errors.load(Ordering::Relaxed),
                        started_at,
                    );
                    metrics::gauge!("syslogd_health_status").set(match snapshot.status {
                        HealthStatus::Healthy => 0.0,
                        HealthStatus::Degraded(_) => 1.0,
                        HealthStatus::Unhealthy(_) => 2.0,
                    });
                    match &snapshot.status {
                        HealthStatus::Healthy => tracing::debug!(
                            uptime_secs = snapshot.uptime_secs,
                            "health check: healthy"
                        ),
                        HealthStatus::Degraded(reason) => tracing::warn!(
                            uptime_secs = snapshot.uptime_secs,
                            reason = %reason,
                            "health check: degraded"
                        ),
                        HealthStatus::Unhealthy(reason) => tracing::error!(
                            uptime_secs = snapshot.uptime_secs,
                            reason = %reason,
                            "health check: unhealthy"
                        ),
                    }
                }
            }
        }
    })
}
