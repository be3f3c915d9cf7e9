use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    tokio::{
        sync::Mutex,
        time::{Duration, sleep},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    channel::{ChannelId, ChannelProtocol, ChannelStatus},
    message::Message,
    registry::ChannelRegistry,
};

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// Caller-visible result of routing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Broadcast fan-out completed (best effort, no retry tracking).
    Delivered,
    /// Enqueued for delivery on a channel; the drain loop takes it from here.
    Queued,
    /// No channel connects sender and recipient and none can be created.
    /// Terminal — never retried.
    NoChannel,
}

/// A message waiting in the pending queue. Owned exclusively by the
/// router; destroyed on delivery or retry exhaustion.
#[derive(Debug)]
struct QueuedDelivery {
    message: Message,
    channel_id: ChannelId,
    retries: u32,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Selects channels and drives the retry queue.
///
/// Retries are flat: a failed entry is re-attempted on the next drain
/// cycle at the same interval, never with backoff. That keeps worst-case
/// delivery latency bounded by `max_retries × drain_interval`.
pub struct Router {
    registry: Arc<ChannelRegistry>,
    queue: Mutex<VecDeque<QueuedDelivery>>,
    max_retries: u32,
    drain_interval: Duration,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Router {
    pub fn new(registry: Arc<ChannelRegistry>, max_retries: u32, drain_interval: Duration) -> Self {
        Self {
            registry,
            queue: Mutex::new(VecDeque::new()),
            max_retries,
            drain_interval,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Route a message: broadcast fan-out, or channel lookup + enqueue.
    ///
    /// History append happens here, at enqueue time; the drain loop only
    /// simulates transmission.
    pub async fn route(&self, message: Message) -> RouteOutcome {
        if message.is_broadcast() {
            return self.fan_out(message).await;
        }

        // recipient presence checked by is_broadcast above
        let Some(recipient) = message.recipient.clone() else {
            return RouteOutcome::NoChannel;
        };

        let channel_id = match self.registry.find(&message.sender, &recipient).await {
            Some(id) => id,
            None => {
                // Create a direct channel when the recipient is known to
                // the fabric at all; otherwise there is no path.
                if !self.registry.knows_participant(&recipient).await {
                    debug!(sender = %message.sender, recipient = %recipient, "no channel and unknown recipient");
                    return RouteOutcome::NoChannel;
                }
                self.registry
                    .get_or_create(
                        &[message.sender.clone(), recipient.clone()],
                        ChannelProtocol::Direct,
                    )
                    .await
            },
        };

        self.registry.record_delivery(&channel_id, &message).await;
        self.queue.lock().await.push_back(QueuedDelivery {
            message,
            channel_id,
            retries: 0,
        });
        RouteOutcome::Queued
    }

    /// Best-effort broadcast: record into every eligible channel, no queue
    /// entries, no retries.
    async fn fan_out(&self, message: Message) -> RouteOutcome {
        let targets = self.registry.broadcast_targets(&message.sender).await;
        debug!(message = %message.id, channels = targets.len(), "broadcast fan-out");
        for id in &targets {
            self.registry.record_delivery(id, &message).await;
        }
        RouteOutcome::Delivered
    }

    /// One pass over the pending queue.
    ///
    /// Entries re-enqueued by this pass are not reattempted until the next
    /// pass, so each message fails at most once per drain cycle.
    pub async fn drain_once(&self) {
        let pending: Vec<QueuedDelivery> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };

        for mut entry in pending {
            match self.registry.status(&entry.channel_id).await {
                Some(ChannelStatus::Active) => {
                    // Simulated transmission: wait out the channel's
                    // current latency.
                    let latency = self
                        .registry
                        .latency(&entry.channel_id)
                        .await
                        .unwrap_or(0.0);
                    sleep(Duration::from_millis(latency as u64)).await;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        message = %entry.message.id,
                        channel = %entry.channel_id,
                        retries = entry.retries,
                        "delivered"
                    );
                },
                _ => {
                    if entry.retries >= self.max_retries {
                        // One failure report per original message.
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            message = %entry.message.id,
                            channel = %entry.channel_id,
                            attempts = entry.retries + 1,
                            "delivery failed, retries exhausted"
                        );
                        continue;
                    }
                    entry.retries += 1;
                    self.queue.lock().await.push_back(entry);
                },
            }
        }
    }

    /// The drain loop. Runs until the token is cancelled; entries still
    /// queued at shutdown are abandoned.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.drain_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let abandoned = self.queue.lock().await.len();
                    info!(abandoned, "drain loop stopped");
                    return;
                }
                _ = interval.tick() => self.drain_once().await,
            }
        }
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn router(registry: Arc<ChannelRegistry>) -> Router {
        Router::new(registry, 3, Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn unicast_enqueues_and_records_history() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        let ch = registry
            .get_or_create(&names(&["a", "b"]), ChannelProtocol::Direct)
            .await;
        let router = router(Arc::clone(&registry));

        let outcome = router.route(Message::new("a", Some("b"), "hi")).await;
        assert_eq!(outcome, RouteOutcome::Queued);
        assert_eq!(registry.history(&ch).await.len(), 1);
        assert_eq!(router.queue_len().await, 1);

        router.drain_once().await;
        assert_eq!(router.queue_len().await, 0);
        assert_eq!(router.delivered_count(), 1);
    }

    #[tokio::test]
    async fn unknown_recipient_is_terminal_no_channel() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        let router = router(Arc::clone(&registry));

        let outcome = router.route(Message::new("a", Some("ghost"), "hi")).await;
        assert_eq!(outcome, RouteOutcome::NoChannel);
        assert_eq!(router.queue_len().await, 0);
    }

    #[tokio::test]
    async fn known_recipient_gets_a_direct_channel_on_demand() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        // "c" is known via an unrelated channel.
        registry
            .get_or_create(&names(&["b", "c"]), ChannelProtocol::Direct)
            .await;
        let router = router(Arc::clone(&registry));

        let outcome = router.route(Message::new("a", Some("c"), "hi")).await;
        assert_eq!(outcome, RouteOutcome::Queued);
        assert!(registry.find("a", "c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_failure_reported_once() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        let ch = registry
            .get_or_create(&names(&["a", "b"]), ChannelProtocol::Direct)
            .await;
        registry.set_status(&ch, ChannelStatus::Congested).await;
        let router = router(Arc::clone(&registry));

        router.route(Message::new("a", Some("b"), "hi")).await;

        // Attempt 1 + max_retries re-attempts, then the entry is dropped.
        for _ in 0..4 {
            router.drain_once().await;
        }
        assert_eq!(router.queue_len().await, 0);
        assert_eq!(router.failed_count(), 1);
        assert_eq!(router.delivered_count(), 0);

        // Further drains must not re-report.
        router.drain_once().await;
        assert_eq!(router.failed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_channel_delivers_before_exhaustion() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        let ch = registry
            .get_or_create(&names(&["a", "b"]), ChannelProtocol::Direct)
            .await;
        registry.set_status(&ch, ChannelStatus::Congested).await;
        let router = router(Arc::clone(&registry));

        router.route(Message::new("a", Some("b"), "hi")).await;
        router.drain_once().await;
        assert_eq!(router.queue_len().await, 1);

        registry.set_status(&ch, ChannelStatus::Active).await;
        router.drain_once().await;
        assert_eq!(router.delivered_count(), 1);
        assert_eq!(router.failed_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_records_into_eligible_channels_without_queueing() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_secs(3600)));
        let own = registry
            .get_or_create(&names(&["a", "b"]), ChannelProtocol::Direct)
            .await;
        let mesh = registry
            .get_or_create(&names(&["c", "d"]), ChannelProtocol::Mesh)
            .await;
        let other = registry
            .get_or_create(&names(&["c", "d"]), ChannelProtocol::Direct)
            .await;
        let router = router(Arc::clone(&registry));

        let outcome = router.route(Message::new("a", None, "to all")).await;
        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(registry.history(&own).await.len(), 1);
        assert_eq!(registry.history(&mesh).await.len(), 1);
        assert!(registry.history(&other).await.is_empty());
        assert_eq!(router.queue_len().await, 0);
    }
}
