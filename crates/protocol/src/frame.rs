use serde::{Deserialize, Serialize};

// ── Frame envelope ───────────────────────────────────────────────────────────

/// Envelope type tag. Wire values are uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameType {
    Command,
    Response,
    Event,
    Heartbeat,
}

/// The JSON envelope exchanged over a gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

impl Frame {
    fn new(frame_type: FrameType, source: &str, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            frame_type,
            source: source.to_string(),
            target: None,
            payload,
            timestamp: now_ms(),
        }
    }

    pub fn event(source: &str, payload: serde_json::Value) -> Self {
        Self::new(FrameType::Event, source, payload)
    }

    /// A RESPONSE frame answering the request with id `request_id`.
    pub fn response(source: &str, request_id: &str, payload: serde_json::Value) -> Self {
        let mut frame = Self::new(FrameType::Response, source, payload);
        frame.id = request_id.to_string();
        frame
    }

    pub fn heartbeat(source: &str, payload: &str) -> Self {
        Self::new(FrameType::Heartbeat, source, serde_json::Value::String(payload.into()))
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Message priority ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ── Commands ─────────────────────────────────────────────────────────────────

/// COMMAND payloads, decoded at the gateway boundary.
///
/// A closed set: unknown command strings are rejected with
/// `INVALID_REQUEST` before they reach the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Send a message to a single recipient through the fabric.
    Send {
        to: String,
        content: String,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        metadata: std::collections::HashMap<String, String>,
    },
    /// Fan a message out to every reachable channel (best effort).
    Broadcast {
        content: String,
        #[serde(default)]
        priority: Priority,
    },
    /// Explicitly establish a channel between participants.
    EstablishChannel {
        participants: Vec<String>,
        protocol: String,
    },
    /// Mark a channel failed. Requires authority approval.
    TeardownChannel { channel_id: String },
    /// Transcode content between channel protocols.
    Translate {
        content: String,
        source_protocol: String,
        target_protocol: String,
    },
    /// Fabric-wide status snapshot.
    FabricStatus,
}

// ── Events ───────────────────────────────────────────────────────────────────

/// EVENT payloads handled directly by the gateway, bypassing the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Client declares its capability list.
    RegisterCapabilities { capabilities: Vec<String> },
    /// Relay a payload to every other connected client.
    Relay { content: serde_json::Value },
}
