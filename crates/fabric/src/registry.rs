use std::collections::{BTreeSet, HashMap};

use {
    tokio::{
        sync::RwLock,
        time::{Duration, Instant},
    },
    tracing::{debug, info},
};

use crate::{
    channel::{Channel, ChannelId, ChannelProtocol, ChannelStatus, DeliveryRecord},
    message::Message,
};

// ── Snapshots ────────────────────────────────────────────────────────────────

/// Read-only channel view for status reporting.
#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub participants: Vec<String>,
    pub protocol: ChannelProtocol,
    pub status: ChannelStatus,
    pub bandwidth: f64,
    pub latency: f64,
    pub history_len: usize,
}

/// Timestamps-only load view handed to the health monitor. History content
/// never crosses this boundary.
#[derive(Debug, Clone)]
pub struct ChannelLoad {
    pub id: ChannelId,
    pub recorded: Vec<Instant>,
    pub base_latency: f64,
    pub status: ChannelStatus,
}

// ── Registry ─────────────────────────────────────────────────────────────────

struct RegistryInner {
    channels: HashMap<ChannelId, Channel>,
    next_seq: u64,
}

/// Exclusive owner of all channels and their histories.
///
/// Every mutation goes through this type's methods under the write lock;
/// no raw map access is exposed. Channels persist for the fabric's
/// lifetime — teardown marks them Failed, it never deletes.
pub struct ChannelRegistry {
    inner: RwLock<RegistryInner>,
    retention: Duration,
}

impl ChannelRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                channels: HashMap::new(),
                next_seq: 0,
            }),
            retention,
        }
    }

    /// Return an existing channel over exactly these participants and
    /// protocol, or establish a new one.
    pub async fn get_or_create(
        &self,
        participants: &[String],
        protocol: ChannelProtocol,
    ) -> ChannelId {
        let set: BTreeSet<String> = participants.iter().cloned().collect();
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .channels
            .values()
            .find(|c| c.participants == set && c.protocol == protocol)
        {
            return existing.id.clone();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let channel = Channel::establish(seq, set, protocol);
        let id = channel.id.clone();
        info!(
            channel = %id,
            protocol = protocol.tag(),
            participants = channel.participants.len(),
            latency = channel.latency,
            "channel established"
        );
        inner.channels.insert(id.clone(), channel);
        id
    }

    /// Best channel connecting `from` and `to`, if any.
    ///
    /// Active channels are preferred; among equals, the one minimizing
    /// `latency + (MAX_BANDWIDTH - bandwidth)` wins, ties broken by
    /// earliest creation. Maintenance channels are never selected.
    pub async fn find(&self, from: &str, to: &str) -> Option<ChannelId> {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .filter(|c| c.connects(from, to) && c.status != ChannelStatus::Maintenance)
            .min_by(|a, b| {
                let active_a = a.status == ChannelStatus::Active;
                let active_b = b.status == ChannelStatus::Active;
                active_b
                    .cmp(&active_a)
                    .then(a.route_cost().total_cmp(&b.route_cost()))
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|c| c.id.clone())
    }

    /// Whether any channel names this agent as a participant.
    pub async fn knows_participant(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .any(|c| c.participants.contains(name))
    }

    /// Append a delivery to the channel's history, lazily trimming entries
    /// older than the retention window.
    pub async fn record_delivery(&self, id: &ChannelId, message: &Message) {
        let now = Instant::now();
        let retention = self.retention;
        let mut inner = self.inner.write().await;
        if let Some(channel) = inner.channels.get_mut(id) {
            channel
                .history
                .retain(|r| now.duration_since(r.recorded_at) <= retention);
            channel.history.push(DeliveryRecord {
                message: message.clone(),
                recorded_at: now,
            });
            debug!(channel = %id, message = %message.id, history = channel.history.len(), "delivery recorded");
        }
    }

    /// Channels participating in a broadcast from `sender`: every channel
    /// whose protocol is broadcast-capable, plus any the sender belongs to.
    pub async fn broadcast_targets(&self, sender: &str) -> Vec<ChannelId> {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .filter(|c| c.protocol.broadcast_capable() || c.participants.contains(sender))
            .map(|c| c.id.clone())
            .collect()
    }

    pub async fn status(&self, id: &ChannelId) -> Option<ChannelStatus> {
        self.inner.read().await.channels.get(id).map(|c| c.status)
    }

    pub async fn latency(&self, id: &ChannelId) -> Option<f64> {
        self.inner.read().await.channels.get(id).map(|c| c.latency)
    }

    /// Mark a channel out of service. Used by teardown; the channel object
    /// itself persists.
    pub async fn set_status(&self, id: &ChannelId, status: ChannelStatus) {
        if let Some(channel) = self.inner.write().await.channels.get_mut(id) {
            channel.status = status;
        }
    }

    /// Monitor write path: new scores plus the status derived from them.
    /// Maintenance is sticky — the monitor never overrides it.
    pub async fn apply_metrics(
        &self,
        id: &ChannelId,
        bandwidth: f64,
        latency: f64,
        status: ChannelStatus,
    ) {
        if let Some(channel) = self.inner.write().await.channels.get_mut(id) {
            channel.bandwidth = bandwidth;
            channel.latency = latency;
            if channel.status != ChannelStatus::Maintenance {
                channel.status = status;
            }
        }
    }

    /// Copy of each channel's recent delivery timestamps for the monitor.
    pub async fn load_snapshot(&self) -> Vec<ChannelLoad> {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .map(|c| ChannelLoad {
                id: c.id.clone(),
                recorded: c.history.iter().map(|r| r.recorded_at).collect(),
                base_latency: c.base_latency(),
                status: c.status,
            })
            .collect()
    }

    pub async fn summaries(&self) -> Vec<ChannelSummary> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .channels
            .values()
            .map(|c| ChannelSummary {
                id: c.id.clone(),
                participants: c.participants.iter().cloned().collect(),
                protocol: c.protocol,
                status: c.status,
                bandwidth: c.bandwidth,
                latency: c.latency,
                history_len: c.history.len(),
            })
            .collect();
        out.sort_by_key(|s| s.id.as_str().to_string());
        out
    }

    /// History clone for a channel (tests and status introspection).
    pub async fn history(&self, id: &ChannelId) -> Vec<Message> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(id)
            .map(|c| c.history.iter().map(|r| r.message.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.read().await.channels.len()
    }
}
