use {async_trait::async_trait, tracing::debug};

/// Handler for binary frames (raw media and other payloads with no
/// structured envelope). Dispatched on a spawned task so it can never
/// block the control-frame path.
#[async_trait]
pub trait BinaryFrameHandler: Send + Sync {
    async fn handle(&self, conn_id: &str, payload: Vec<u8>);
}

/// Default handler: log and drop.
pub struct DiscardBinary;

#[async_trait]
impl BinaryFrameHandler for DiscardBinary {
    async fn handle(&self, conn_id: &str, payload: Vec<u8>) {
        debug!(conn_id, bytes = payload.len(), "binary frame discarded");
    }
}
