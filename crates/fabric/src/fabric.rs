use std::sync::Arc;

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use weft_config::FabricConfig;

use crate::{
    authority::Authority,
    channel::{ChannelId, ChannelStatus},
    error::FabricError,
    filter::{FilterAction, FilterPipeline, FilterVerdict},
    message::Message,
    monitor::HealthMonitor,
    registry::ChannelRegistry,
    router::{RouteOutcome, Router},
    translation::TranslationCache,
};

/// Result of submitting a message through the full pipeline.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Passed the filter; the router's outcome follows.
    Routed {
        outcome: RouteOutcome,
        verdict: FilterVerdict,
    },
    /// Stopped at the filter. `rejection` goes back to the sender; the
    /// router never saw the message.
    Rejected { verdict: FilterVerdict },
}

/// One running fabric instance: registry, router, filter pipeline,
/// monitor, translation cache, and the background loops tying them
/// together.
///
/// Loops are independent tasks; a failure in one never cascades into the
/// others. Shutdown cancels all loops and abandons queued deliveries.
pub struct Fabric {
    pub config: FabricConfig,
    pub registry: Arc<ChannelRegistry>,
    pub router: Arc<Router>,
    pub pipeline: Arc<FilterPipeline>,
    pub translations: Arc<TranslationCache>,
    authority: Arc<dyn Authority>,
    cancel: CancellationToken,
}

impl Fabric {
    /// Build the fabric and spawn its drain and monitor loops.
    pub fn start(
        config: FabricConfig,
        pipeline: FilterPipeline,
        authority: Arc<dyn Authority>,
    ) -> Arc<Self> {
        let registry = Arc::new(ChannelRegistry::new(config.history_retention()));
        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            config.max_retries,
            config.drain_interval(),
        ));
        let monitor = HealthMonitor::new(Arc::clone(&registry), config.monitor_interval());
        let cancel = CancellationToken::new();

        let translations = Arc::new(TranslationCache::new(config.translation_cache_ttl()));
        let fabric = Arc::new(Self {
            config,
            registry,
            router: Arc::clone(&router),
            pipeline: Arc::new(pipeline),
            translations,
            authority,
            cancel: cancel.clone(),
        });

        let drain_router = router;
        let drain_cancel = cancel.clone();
        tokio::spawn(async move { drain_router.run(drain_cancel).await });

        let monitor_cancel = cancel;
        tokio::spawn(async move { monitor.run(monitor_cancel).await });

        info!(
            max_retries = fabric.config.max_retries,
            drain_interval_ms = fabric.config.drain_interval_ms,
            monitor_interval_ms = fabric.config.monitor_interval_ms,
            "fabric started"
        );
        fabric
    }

    /// The mandatory path for every inbound message: filter first, route
    /// only what the filter forwards.
    pub async fn submit(&self, message: Message) -> SubmitOutcome {
        let verdict = self.pipeline.admit(&message);
        match verdict.action {
            FilterAction::Allow | FilterAction::Modify => {
                let Some(forward) = verdict.message.clone() else {
                    // A forwarding action always carries a message; treat
                    // absence as a rejection to stay fail-closed.
                    return SubmitOutcome::Rejected { verdict };
                };
                let outcome = self.router.route(forward).await;
                SubmitOutcome::Routed { outcome, verdict }
            },
            FilterAction::Block | FilterAction::Escalate => {
                SubmitOutcome::Rejected { verdict }
            },
        }
    }

    /// Mark a channel failed. Gated by the external authority.
    pub async fn teardown_channel(
        &self,
        agent: &str,
        channel_id: &ChannelId,
    ) -> Result<(), FabricError> {
        let decision = self
            .authority
            .authorize(agent, "channel.teardown", channel_id.as_str())
            .await;
        if !decision.allows() {
            warn!(agent, channel = %channel_id, ?decision, "teardown not granted");
            return Err(FabricError::Unauthorized {
                action: "channel.teardown".into(),
            });
        }
        self.registry
            .set_status(channel_id, ChannelStatus::Failed)
            .await;
        info!(agent, channel = %channel_id, "channel torn down");
        Ok(())
    }

    /// Stop all loops. Queued deliveries are abandoned, not flushed.
    pub async fn shutdown(&self, agent: &str) -> Result<(), FabricError> {
        let decision = self
            .authority
            .authorize(agent, "fabric.shutdown", "fabric")
            .await;
        if !decision.allows() {
            return Err(FabricError::Unauthorized {
                action: "fabric.shutdown".into(),
            });
        }
        info!(agent, "fabric shutting down");
        self.cancel.cancel();
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
