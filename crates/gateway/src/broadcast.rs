use {tracing::debug, weft_protocol::Frame};

use crate::state::GatewayState;

/// Send a frame to every connected client, pruning connections whose
/// write loop has gone away.
pub async fn broadcast_frame(state: &GatewayState, frame: &Frame) {
    broadcast_except(state, frame, None).await;
}

/// Broadcast, optionally skipping one connection (the relay originator).
pub async fn broadcast_except(state: &GatewayState, frame: &Frame, skip: Option<&str>) {
    let Ok(raw) = serde_json::to_string(frame) else {
        return;
    };

    let mut dead = Vec::new();
    for (conn_id, sender) in state.client_senders().await {
        if skip == Some(conn_id.as_str()) {
            continue;
        }
        if sender.send(raw.clone()).is_err() {
            dead.push(conn_id);
        }
    }

    for conn_id in dead {
        debug!(conn_id, "pruning dead connection during broadcast");
        state.remove_client(&conn_id).await;
    }
}
