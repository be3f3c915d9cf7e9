//! Wire protocol between the weft gateway and external clients.
//!
//! Everything crossing a connection is a [`Frame`]: a JSON envelope tagged
//! with a [`FrameType`]. COMMAND payloads are decoded at the gateway
//! boundary into the closed [`Command`] enum so the fabric core dispatches
//! on a finite set of variants, never on payload strings.

pub mod frame;

pub use frame::{Command, Frame, FrameType, GatewayEvent, Priority};

/// Protocol version advertised in the `connected` event.
pub const PROTOCOL_VERSION: u32 = 1;

/// Heartbeat request payload (literal JSON string).
pub const HEARTBEAT_PING: &str = "ping";
/// Heartbeat reply payload (literal JSON string).
pub const HEARTBEAT_PONG: &str = "pong";

/// Stable error codes carried in RESPONSE frames.
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const NO_CHANNEL: &str = "NO_CHANNEL";
    pub const SAFETY_REJECTED: &str = "SAFETY_REJECTED";
    pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
}

use serde::{Deserialize, Serialize};

// ── Error shape ──────────────────────────────────────────────────────────────

/// Structured error carried in a RESPONSE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── Response frame ───────────────────────────────────────────────────────────

/// Payload of a RESPONSE frame: either a result or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseBody {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: ErrorShape) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
