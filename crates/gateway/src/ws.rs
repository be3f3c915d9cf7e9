use std::sync::Arc;

use {
    axum::extract::ws::{Message as WsMessage, WebSocket},
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tracing::{debug, info, warn},
};

use weft_protocol::{
    Command, ErrorShape, Frame, FrameType, GatewayEvent, HEARTBEAT_PONG, PROTOCOL_VERSION,
    ResponseBody, error_codes,
};

use crate::{
    broadcast::broadcast_except,
    dispatch::handle_command,
    state::{ConnectedClient, GatewayState, SERVER_CAPABILITIES},
};

/// Drive one WebSocket connection: register, greet, pump frames, clean up.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let client = ConnectedClient::new(conn_id.clone(), tx);
    let shutdown = client.shutdown.clone();
    state.register_client(client).await;
    let clients = state.client_count().await;
    info!(conn_id, clients, "connection open");

    // Write loop: ends when the client record (and its sender) is dropped.
    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Capability advertisement.
    let connected = Frame::event(
        "server",
        json!({
            "event": "connected",
            "clientId": conn_id,
            "protocolVersion": PROTOCOL_VERSION,
            "serverCapabilities": SERVER_CAPABILITIES,
        }),
    );
    send_frame(&state, &conn_id, &connected).await;

    // Read loop: ends on close, read error, or eviction by the sweep —
    // an evicted connection must stop injecting frames, not just stop
    // receiving replies.
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    WsMessage::Text(text) => handle_text(&state, &conn_id, &text).await,
                    WsMessage::Binary(payload) => {
                        // Never block the control path on binary payloads.
                        let handler = Arc::clone(&state.binary);
                        let conn = conn_id.clone();
                        tokio::spawn(async move { handler.handle(&conn, payload.to_vec()).await });
                    },
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {},
                }
            },
        }
    }

    // Explicit close or read error; the record may also already be gone
    // if the sweep evicted us.
    state.remove_client(&conn_id).await;
    write_task.abort();
    info!(conn_id, "connection closed");
}

/// Decode and dispatch one text frame.
pub async fn handle_text(state: &GatewayState, conn_id: &str, raw: &str) {
    let frame: Frame = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => {
            debug!(conn_id, error = %e, "undecodable frame");
            let reply = error_response(
                "unknown",
                ErrorShape::new(error_codes::INVALID_REQUEST, format!("bad frame: {e}")),
            );
            send_frame(state, conn_id, &reply).await;
            return;
        },
    };

    match frame.frame_type {
        FrameType::Heartbeat => {
            // Liveness first, then the immediate pong.
            state.touch_heartbeat(conn_id).await;
            let pong = Frame::heartbeat("server", HEARTBEAT_PONG);
            send_frame(state, conn_id, &pong).await;
        },
        FrameType::Command => {
            let command: Command = match serde_json::from_value(frame.payload) {
                Ok(c) => c,
                Err(e) => {
                    let reply = error_response(
                        &frame.id,
                        ErrorShape::new(
                            error_codes::INVALID_REQUEST,
                            format!("bad command: {e}"),
                        ),
                    );
                    send_frame(state, conn_id, &reply).await;
                    return;
                },
            };
            let body = match handle_command(state, conn_id, &frame.source, command).await {
                Ok(result) => ResponseBody::ok(result),
                Err(err) => ResponseBody::err(err),
            };
            let reply = Frame::response(
                "server",
                &frame.id,
                serde_json::to_value(body).unwrap_or_default(),
            );
            send_frame(state, conn_id, &reply).await;
        },
        FrameType::Event => handle_event(state, conn_id, frame).await,
        FrameType::Response => {
            // Client-originated responses have no pending request on our
            // side yet; log and drop.
            debug!(conn_id, frame_id = %frame.id, "unsolicited response frame");
        },
    }
}

/// EVENT frames are handled directly, bypassing the router.
async fn handle_event(state: &GatewayState, conn_id: &str, frame: Frame) {
    let event: GatewayEvent = match serde_json::from_value(frame.payload.clone()) {
        Ok(e) => e,
        Err(e) => {
            debug!(conn_id, error = %e, "unrecognized event payload");
            return;
        },
    };

    match event {
        GatewayEvent::RegisterCapabilities { capabilities } => {
            let client_type = frame
                .payload
                .get("clientType")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            debug!(conn_id, count = capabilities.len(), "capabilities registered");
            state
                .set_registration(conn_id, client_type, capabilities)
                .await;
        },
        GatewayEvent::Relay { content } => {
            let relayed = Frame::event(
                &frame.source,
                json!({ "event": "relay", "content": content }),
            );
            broadcast_except(state, &relayed, Some(conn_id)).await;
        },
    }
}

async fn send_frame(state: &GatewayState, conn_id: &str, frame: &Frame) {
    match serde_json::to_string(frame) {
        Ok(raw) => {
            if state.send_to(conn_id, &raw).await.is_err() {
                // Connection already closed; normal terminal condition.
                debug!(conn_id, "send to closed connection skipped");
            }
        },
        Err(e) => warn!(conn_id, error = %e, "frame serialization failed"),
    }
}

fn error_response(request_id: &str, err: ErrorShape) -> Frame {
    Frame::response(
        "server",
        request_id,
        serde_json::to_value(ResponseBody::err(err)).unwrap_or_default(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use {
        weft_config::FabricConfig,
        weft_fabric::{AllowAll, Fabric, FilterPipeline},
        weft_protocol::frame::now_ms,
    };

    use super::*;
    use crate::binary::DiscardBinary;

    async fn wired_client(
        state: &GatewayState,
        conn_id: &str,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register_client(ConnectedClient::new(conn_id.to_string(), tx))
            .await;
        rx
    }

    async fn state() -> Arc<GatewayState> {
        let fabric = Fabric::start(
            FabricConfig::default(),
            FilterPipeline::with_default_rules(100),
            Arc::new(AllowAll),
        );
        GatewayState::new(fabric, Arc::new(DiscardBinary))
    }

    fn raw_frame(frame_type: &str, id: &str, payload: serde_json::Value) -> String {
        serde_json::to_string(&json!({
            "id": id,
            "type": frame_type,
            "source": "agent-a",
            "payload": payload,
            "timestamp": now_ms(),
        }))
        .unwrap()
    }

    // `ws.on_upgrade` requires a `Send` handler future; this fails to
    // compile if an await inside `handle_connection` ever captures a
    // non-`Send` borrow (e.g. a tracing field value held across the
    // await).
    #[allow(dead_code)]
    fn connection_handler_is_send(socket: WebSocket, state: Arc<GatewayState>) {
        fn assert_send<F: Send>(_: F) {}
        assert_send(handle_connection(socket, state));
    }

    #[tokio::test]
    async fn heartbeat_gets_immediate_pong() {
        let state = state().await;
        let mut rx = wired_client(&state, "c1").await;

        handle_text(&state, "c1", &raw_frame("HEARTBEAT", "h1", json!("ping"))).await;

        let reply: Frame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.frame_type, FrameType::Heartbeat);
        assert_eq!(reply.payload, json!("pong"));
    }

    #[tokio::test]
    async fn command_frame_gets_a_response_with_matching_id() {
        let state = state().await;
        let mut rx = wired_client(&state, "c1").await;

        handle_text(
            &state,
            "c1",
            &raw_frame("COMMAND", "req-1", json!({ "command": "fabric_status" })),
        )
        .await;

        let reply: Frame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.id, "req-1");
        assert_eq!(reply.frame_type, FrameType::Response);
        let body: ResponseBody = serde_json::from_value(reply.payload).unwrap();
        assert!(body.is_ok());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_at_the_boundary() {
        let state = state().await;
        let mut rx = wired_client(&state, "c1").await;

        handle_text(
            &state,
            "c1",
            &raw_frame("COMMAND", "req-2", json!({ "command": "rm_rf" })),
        )
        .await;

        let reply: Frame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let body: ResponseBody = serde_json::from_value(reply.payload).unwrap();
        assert_eq!(body.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn relay_event_fans_out_to_other_clients_only() {
        let state = state().await;
        let mut rx_a = wired_client(&state, "a").await;
        let mut rx_b = wired_client(&state, "b").await;

        handle_text(
            &state,
            "a",
            &raw_frame("EVENT", "e1", json!({ "event": "relay", "content": "hi all" })),
        )
        .await;

        assert!(rx_a.try_recv().is_err());
        let relayed: Frame = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(relayed.frame_type, FrameType::Event);
        assert_eq!(relayed.payload["content"], "hi all");
    }

    #[tokio::test]
    async fn register_capabilities_updates_the_record() {
        let state = state().await;
        let _rx = wired_client(&state, "c1").await;

        handle_text(
            &state,
            "c1",
            &raw_frame(
                "EVENT",
                "e1",
                json!({
                    "event": "register_capabilities",
                    "clientType": "agent",
                    "capabilities": ["tts", "vision"],
                }),
            ),
        )
        .await;

        // Verify indirectly via no panic + heartbeat still works.
        assert!(state.touch_heartbeat("c1").await);
    }

    #[tokio::test]
    async fn garbage_frame_yields_invalid_request() {
        let state = state().await;
        let mut rx = wired_client(&state, "c1").await;

        handle_text(&state, "c1", "not json at all").await;

        let reply: Frame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let body: ResponseBody = serde_json::from_value(reply.payload).unwrap();
        assert_eq!(body.error.unwrap().code, error_codes::INVALID_REQUEST);
    }
}
