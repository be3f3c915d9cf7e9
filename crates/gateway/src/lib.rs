//! The client gateway: persistent WebSocket connections bridged into the
//! fabric.
//!
//! Inbound frames are decoded at this boundary — COMMAND payloads into the
//! closed command enum, EVENT payloads into direct handlers — so nothing
//! past this crate dispatches on strings. Liveness is heartbeat-tracked;
//! a background sweep evicts stale connections.

pub mod binary;
pub mod broadcast;
pub mod dispatch;
pub mod server;
pub mod state;
pub mod sweep;
pub mod ws;

pub use {
    binary::{BinaryFrameHandler, DiscardBinary},
    server::{build_gateway_app, start_gateway},
    state::{ConnectedClient, GatewayState},
};
