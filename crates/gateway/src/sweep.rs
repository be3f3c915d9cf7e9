use std::sync::Arc;

use {
    tokio::time::Duration,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::state::GatewayState;

/// Background stale-connection sweep.
///
/// A connection silent past the heartbeat timeout is force-closed:
/// eviction cancels the record's shutdown token (ending the read loop)
/// and drops its frame sender (ending the write loop), which closes the
/// socket. A last-second heartbeat racing the sweep is fine either way —
/// liveness here is best effort, not consensus.
pub async fn run_sweep(
    state: Arc<GatewayState>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("connection sweep stopped");
                return;
            }
            _ = ticker.tick() => {
                for client in state.evict_stale(timeout).await {
                    warn!(
                        conn_id = %client.conn_id,
                        client_type = %client.client_type,
                        idle_secs = client.last_heartbeat.elapsed().as_secs(),
                        "evicting stale connection"
                    );
                }
            }
        }
    }
}
