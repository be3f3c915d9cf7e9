use std::sync::Arc;

use {
    tokio::time::{Duration, Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    channel::{ChannelStatus, MAX_BANDWIDTH, MIN_BANDWIDTH},
    registry::ChannelRegistry,
};

/// Trailing window the load factor is computed over.
const LOAD_WINDOW: Duration = Duration::from_secs(60);

// ── Pure scoring functions ───────────────────────────────────────────────────

/// Bandwidth under load: linear decrease with a floor.
pub fn bandwidth_for_load(load: usize) -> f64 {
    (MAX_BANDWIDTH - 2.0 * load as f64).max(MIN_BANDWIDTH)
}

/// Latency under load: the channel's base latency plus discrete steps as
/// load crosses fixed thresholds.
pub fn latency_for_load(base_latency: f64, load: usize) -> f64 {
    let step = match load {
        0..=9 => 0.0,
        10..=29 => 10.0,
        30..=59 => 25.0,
        _ => 50.0,
    };
    base_latency + step
}

/// Composite health in [0, 1] from the three penalty terms.
pub fn health_score(load: usize, bandwidth: f64, latency: f64) -> f64 {
    let load_factor = load as f64 / 60.0;
    let bandwidth_utilization = (MAX_BANDWIDTH - bandwidth) / MAX_BANDWIDTH;
    let latency_penalty = latency / 100.0;
    (1.0 - load_factor - bandwidth_utilization - latency_penalty).clamp(0.0, 1.0)
}

/// Status is a pure function of the health score.
pub fn status_for_health(health: f64) -> ChannelStatus {
    if health > 0.8 {
        ChannelStatus::Active
    } else if health > 0.5 {
        ChannelStatus::Idle
    } else if health > 0.2 {
        ChannelStatus::Congested
    } else {
        ChannelStatus::Failed
    }
}

// ── Monitor ──────────────────────────────────────────────────────────────────

/// Periodically recomputes every channel's scores and status from recent
/// traffic.
///
/// Status is a monitoring signal, not a control input: routing reads it
/// asynchronously and may observe it briefly stale. The monitor only ever
/// sees delivery timestamps, never history content.
pub struct HealthMonitor {
    registry: Arc<ChannelRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ChannelRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One recomputation pass over all channels.
    pub async fn tick(&self) {
        let now = Instant::now();
        for load_view in self.registry.load_snapshot().await {
            if load_view.status == ChannelStatus::Maintenance {
                continue;
            }
            let load = load_view
                .recorded
                .iter()
                .filter(|t| now.duration_since(**t) <= LOAD_WINDOW)
                .count();

            let bandwidth = bandwidth_for_load(load);
            let latency = latency_for_load(load_view.base_latency, load);
            let health = health_score(load, bandwidth, latency);
            let status = status_for_health(health);

            debug!(
                channel = %load_view.id,
                load,
                bandwidth,
                latency,
                health,
                ?status,
                "channel health recomputed"
            );
            self.registry
                .apply_metrics(&load_view.id, bandwidth, latency, status)
                .await;
        }
    }

    /// The monitor loop; runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health monitor stopped");
                    return;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }
}
