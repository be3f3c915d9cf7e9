use {
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use {
    weft_fabric::{
        ChannelId, ChannelProtocol, FabricError, Message, RouteOutcome, SubmitOutcome,
    },
    weft_protocol::{Command, ErrorShape, error_codes},
};

use crate::state::GatewayState;

/// Handle one decoded COMMAND. `source` is the envelope's declared agent
/// identity; the connection id only matters for logging.
pub async fn handle_command(
    state: &GatewayState,
    conn_id: &str,
    source: &str,
    command: Command,
) -> Result<Value, ErrorShape> {
    match command {
        Command::Send {
            to,
            content,
            priority,
            metadata,
        } => {
            let message = Message::new(source, Some(&to), &content)
                .with_priority(priority)
                .with_metadata(metadata);
            let message_id = message.id.to_string();
            submit(state, conn_id, message, &message_id).await
        },
        Command::Broadcast { content, priority } => {
            let message = Message::new(source, None, &content).with_priority(priority);
            let message_id = message.id.to_string();
            submit(state, conn_id, message, &message_id).await
        },
        Command::EstablishChannel {
            participants,
            protocol,
        } => {
            if participants.len() < 2 {
                return Err(ErrorShape::new(
                    error_codes::INVALID_REQUEST,
                    "a channel needs at least two participants",
                ));
            }
            let protocol = ChannelProtocol::parse(&protocol).map_err(error_shape)?;
            let id = state
                .fabric
                .registry
                .get_or_create(&participants, protocol)
                .await;
            let latency = state.fabric.registry.latency(&id).await;
            Ok(json!({ "channelId": id.as_str(), "latency": latency }))
        },
        Command::TeardownChannel { channel_id } => {
            let id = ChannelId::from_string(channel_id);
            state
                .fabric
                .teardown_channel(source, &id)
                .await
                .map_err(error_shape)?;
            Ok(json!({ "channelId": id.as_str(), "status": "failed" }))
        },
        Command::Translate {
            content,
            source_protocol,
            target_protocol,
        } => {
            let from = ChannelProtocol::parse(&source_protocol).map_err(error_shape)?;
            let to = ChannelProtocol::parse(&target_protocol).map_err(error_shape)?;
            let (entry, cached) = state.fabric.translations.translate(&content, from, to);
            Ok(json!({
                "translated": entry.translated,
                "confidence": entry.confidence,
                "cached": cached,
            }))
        },
        Command::FabricStatus => {
            let channels: Vec<_> = state
                .fabric
                .registry
                .summaries()
                .await
                .into_iter()
                .map(|s| {
                    json!({
                        "channelId": s.id.as_str(),
                        "participants": s.participants,
                        "protocol": s.protocol.tag(),
                        "status": s.status,
                        "bandwidth": s.bandwidth,
                        "latency": s.latency,
                        "historyLen": s.history_len,
                    })
                })
                .collect();
            Ok(json!({
                "version": state.version,
                "connections": state.client_count().await,
                "channels": channels,
                "delivered": state.fabric.router.delivered_count(),
                "deliveryFailures": state.fabric.router.failed_count(),
                "pendingApprovals": state.fabric.pipeline.pending_approvals().len(),
            }))
        },
    }
}

/// Push a message through the filter pipeline and router, mapping the
/// outcome to a response payload or error.
async fn submit(
    state: &GatewayState,
    conn_id: &str,
    message: Message,
    message_id: &str,
) -> Result<Value, ErrorShape> {
    let sender = message.sender.clone();
    let recipient = message.recipient.clone();
    match state.fabric.submit(message).await {
        SubmitOutcome::Rejected { verdict } => {
            warn!(
                conn_id,
                sender,
                risk = ?verdict.risk,
                rules = ?verdict.matched_rules,
                "message rejected by safety filter"
            );
            Err(error_shape(FabricError::SafetyRejected {
                rules: verdict.matched_rules,
            }))
        },
        SubmitOutcome::Routed { outcome, .. } => match outcome {
            RouteOutcome::NoChannel => Err(error_shape(FabricError::NoChannel {
                from: sender,
                to: recipient.unwrap_or_default(),
            })),
            RouteOutcome::Queued => {
                debug!(conn_id, message_id, "message queued");
                Ok(json!({ "messageId": message_id, "outcome": "queued" }))
            },
            RouteOutcome::Delivered => {
                Ok(json!({ "messageId": message_id, "outcome": "delivered" }))
            },
        },
    }
}

/// Map the fabric error taxonomy onto wire error codes. The display
/// text becomes the client-facing message.
fn error_shape(err: FabricError) -> ErrorShape {
    let code = match &err {
        FabricError::NoChannel { .. } => error_codes::NO_CHANNEL,
        FabricError::SafetyRejected { .. } => error_codes::SAFETY_REJECTED,
        FabricError::Unauthorized { .. } => error_codes::UNAUTHORIZED,
        FabricError::ConnectionLost => error_codes::DELIVERY_FAILED,
        FabricError::UnknownProtocol(_) => error_codes::INVALID_REQUEST,
    };
    ErrorShape::new(code, err.to_string())
}
