use std::{collections::HashMap, sync::Arc};

use {
    tokio::{
        sync::{RwLock, mpsc},
        time::{Duration, Instant},
    },
    tokio_util::sync::CancellationToken,
};

use weft_fabric::{Fabric, FabricError};

use crate::binary::BinaryFrameHandler;

/// Capabilities advertised to every client in the `connected` event.
pub const SERVER_CAPABILITIES: &[&str] = &[
    "send",
    "broadcast",
    "establish_channel",
    "teardown_channel",
    "translate",
    "fabric_status",
];

// ── Connected client ─────────────────────────────────────────────────────────

/// A client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Declared client type ("agent", "ui", ...); "unknown" until the
    /// client registers.
    pub client_type: String,
    pub capabilities: Vec<String>,
    /// Channel into this connection's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    /// Cancelled to force-close the connection; the read loop selects on
    /// it, so eviction terminates the handler, not just the write side.
    pub shutdown: CancellationToken,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
}

impl ConnectedClient {
    pub fn new(conn_id: String, sender: mpsc::UnboundedSender<String>) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            client_type: "unknown".into(),
            capabilities: Vec::new(),
            sender,
            shutdown: CancellationToken::new(),
            connected_at: now,
            last_heartbeat: now,
        }
    }

    /// Send a serialized frame. `ConnectionLost` means the write loop is
    /// gone — a normal terminal condition for a handler.
    pub fn send(&self, frame: &str) -> Result<(), FabricError> {
        self.sender
            .send(frame.to_string())
            .map_err(|_| FabricError::ConnectionLost)
    }

    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state.
///
/// The connection map is owned exclusively by this type; eviction and
/// insertion go through its methods and never race destructively with a
/// live handler — a handler finding its record gone treats that as a
/// closed connection.
pub struct GatewayState {
    clients: RwLock<HashMap<String, ConnectedClient>>,
    pub fabric: Arc<Fabric>,
    pub binary: Arc<dyn BinaryFrameHandler>,
    pub version: String,
}

impl GatewayState {
    pub fn new(fabric: Arc<Fabric>, binary: Arc<dyn BinaryFrameHandler>) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            fabric,
            binary,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Record a heartbeat. Returns false when the connection is already
    /// gone (e.g. swept concurrently).
    pub async fn touch_heartbeat(&self, conn_id: &str) -> bool {
        match self.clients.write().await.get_mut(conn_id) {
            Some(client) => {
                client.touch();
                true
            },
            None => false,
        }
    }

    pub async fn set_registration(
        &self,
        conn_id: &str,
        client_type: Option<String>,
        capabilities: Vec<String>,
    ) {
        if let Some(client) = self.clients.write().await.get_mut(conn_id) {
            if let Some(t) = client_type {
                client.client_type = t;
            }
            client.capabilities = capabilities;
        }
    }

    /// Send a serialized frame to one client.
    pub async fn send_to(&self, conn_id: &str, frame: &str) -> Result<(), FabricError> {
        match self.clients.read().await.get(conn_id) {
            Some(client) => client.send(frame),
            None => Err(FabricError::ConnectionLost),
        }
    }

    /// Remove every client whose last heartbeat is older than `timeout`
    /// and force-close the removed connections: cancelling the shutdown
    /// token ends the read loop, dropping the sender ends the write loop.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<ConnectedClient> {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        let stale: Vec<String> = clients
            .values()
            .filter(|c| now.duration_since(c.last_heartbeat) > timeout)
            .map(|c| c.conn_id.clone())
            .collect();
        let evicted: Vec<ConnectedClient> = stale
            .iter()
            .filter_map(|id| clients.remove(id))
            .collect();
        for client in &evicted {
            client.shutdown.cancel();
        }
        evicted
    }

    /// Snapshot of conn ids and senders for broadcast.
    pub async fn client_senders(&self) -> Vec<(String, mpsc::UnboundedSender<String>)> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| (c.conn_id.clone(), c.sender.clone()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use weft_fabric::{AllowAll, FilterPipeline};

    async fn state() -> Arc<GatewayState> {
        let fabric = Fabric::start(
            weft_config::FabricConfig::default(),
            FilterPipeline::new(10),
            Arc::new(AllowAll),
        );
        GatewayState::new(fabric, Arc::new(crate::binary::DiscardBinary))
    }

    fn client(id: &str) -> (ConnectedClient, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectedClient::new(id.to_string(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn register_and_evict() {
        let state = state().await;
        let (c, _rx) = client("c1");
        state.register_client(c).await;
        assert_eq!(state.client_count().await, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let evicted = state.evict_stale(Duration::from_secs(60)).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(state.client_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_force_closes_the_connection() {
        let state = state().await;
        let (c, _rx) = client("c1");
        let shutdown = c.shutdown.clone();
        state.register_client(c).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        state.evict_stale(Duration::from_secs(60)).await;

        // The read loop selects on this token; cancellation means the
        // evicted client can no longer inject frames.
        assert!(shutdown.is_cancelled());
        assert!(state.send_to("c1", "{}").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_heartbeats_prevent_eviction() {
        let state = state().await;
        let (c, _rx) = client("c1");
        state.register_client(c).await;

        // Heartbeat every 20s against a 60s timeout: never evicted.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(20)).await;
            assert!(state.touch_heartbeat("c1").await);
            let evicted = state.evict_stale(Duration::from_secs(60)).await;
            assert!(evicted.is_empty());
        }
        assert_eq!(state.client_count().await, 1);
    }

    #[tokio::test]
    async fn touch_after_removal_is_a_clean_no_op() {
        let state = state().await;
        let (c, _rx) = client("c1");
        state.register_client(c).await;
        state.remove_client("c1").await;
        assert!(!state.touch_heartbeat("c1").await);
        assert!(matches!(
            state.send_to("c1", "{}").await,
            Err(FabricError::ConnectionLost)
        ));
    }
}
