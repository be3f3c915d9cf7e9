use thiserror::Error;

/// Fabric error taxonomy.
///
/// Transient delivery failures never appear here — the router retries
/// them internally and reports exhaustion once, out of band.
#[derive(Debug, Error)]
pub enum FabricError {
    /// No path between the endpoints and none can be created. Terminal,
    /// never retried.
    #[error("no channel between {from} and {to}")]
    NoChannel { from: String, to: String },

    /// The filter pipeline refused the message.
    #[error("rejected by safety filter (rules: {rules:?})")]
    SafetyRejected { rules: Vec<String> },

    /// The external authority did not grant the action.
    #[error("not authorized to {action}")]
    Unauthorized { action: String },

    /// The peer connection went away. Normal terminal condition for a
    /// connection handler, never propagated across connections.
    #[error("connection lost")]
    ConnectionLost,

    #[error("unknown channel protocol: {0}")]
    UnknownProtocol(String),
}
