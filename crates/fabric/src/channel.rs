use std::collections::BTreeSet;

use {
    serde::{Deserialize, Serialize},
    tokio::time::Instant,
};

use crate::{error::FabricError, message::Message};

/// Upper bandwidth score for any channel.
pub const MAX_BANDWIDTH: f64 = 100.0;
/// Bandwidth floor under sustained load.
pub const MIN_BANDWIDTH: f64 = 10.0;
/// Per-participant linear latency cost.
pub const PARTICIPANT_LATENCY_COST: f64 = 2.0;

// ── Protocol ─────────────────────────────────────────────────────────────────

/// Transport semantics of a channel, fixed at establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelProtocol {
    Direct,
    Broadcast,
    Multicast,
    SecureTunnel,
    Mesh,
    Hierarchical,
}

impl ChannelProtocol {
    /// Baseline latency, ascending direct → hierarchical.
    pub fn baseline_latency(self) -> f64 {
        match self {
            Self::Direct => 5.0,
            Self::Broadcast => 10.0,
            Self::Multicast => 15.0,
            Self::Mesh => 20.0,
            Self::SecureTunnel => 25.0,
            Self::Hierarchical => 30.0,
        }
    }

    /// Whether a channel of this protocol takes part in broadcast fan-out
    /// regardless of membership.
    pub fn broadcast_capable(self) -> bool {
        matches!(self, Self::Broadcast | Self::Multicast | Self::Mesh)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
            Self::Multicast => "multicast",
            Self::SecureTunnel => "secure_tunnel",
            Self::Mesh => "mesh",
            Self::Hierarchical => "hierarchical",
        }
    }

    pub fn parse(tag: &str) -> Result<Self, FabricError> {
        match tag {
            "direct" => Ok(Self::Direct),
            "broadcast" => Ok(Self::Broadcast),
            "multicast" => Ok(Self::Multicast),
            "secure_tunnel" => Ok(Self::SecureTunnel),
            "mesh" => Ok(Self::Mesh),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(FabricError::UnknownProtocol(other.to_string())),
        }
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

/// Channel status. Written only by the health monitor (and teardown);
/// routing reads it asynchronously and may observe it briefly stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Active,
    Idle,
    Congested,
    Failed,
    Maintenance,
}

// ── Channel ──────────────────────────────────────────────────────────────────

/// Channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery recorded into a channel's sliding history window.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub message: Message,
    pub recorded_at: Instant,
}

/// A logical message path between a fixed set of participants.
///
/// Owned exclusively by the [`crate::registry::ChannelRegistry`]; never
/// deleted once created, only marked Failed or Maintenance.
#[derive(Debug)]
pub struct Channel {
    pub id: ChannelId,
    /// Creation order, used to break score ties on lookup.
    pub seq: u64,
    pub participants: BTreeSet<String>,
    pub protocol: ChannelProtocol,
    pub status: ChannelStatus,
    pub history: Vec<DeliveryRecord>,
    pub bandwidth: f64,
    pub latency: f64,
}

impl Channel {
    pub fn establish(seq: u64, participants: BTreeSet<String>, protocol: ChannelProtocol) -> Self {
        let latency =
            protocol.baseline_latency() + PARTICIPANT_LATENCY_COST * participants.len() as f64;
        Self {
            id: ChannelId::generate(),
            seq,
            participants,
            protocol,
            status: ChannelStatus::Active,
            history: Vec::new(),
            bandwidth: MAX_BANDWIDTH,
            latency,
        }
    }

    /// Baseline latency for this channel when idle (protocol + membership).
    pub fn base_latency(&self) -> f64 {
        self.protocol.baseline_latency()
            + PARTICIPANT_LATENCY_COST * self.participants.len() as f64
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        self.participants.contains(a) && self.participants.contains(b)
    }

    /// Lookup cost: lower is better. Combines latency with missing bandwidth.
    pub fn route_cost(&self) -> f64 {
        self.latency + (MAX_BANDWIDTH - self.bandwidth)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn participants(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn baseline_latency_is_strictly_ascending() {
        let order = [
            ChannelProtocol::Direct,
            ChannelProtocol::Broadcast,
            ChannelProtocol::Multicast,
            ChannelProtocol::Mesh,
            ChannelProtocol::SecureTunnel,
            ChannelProtocol::Hierarchical,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].baseline_latency() < pair[1].baseline_latency());
        }
    }

    #[tokio::test]
    async fn establishment_fixes_latency_from_protocol_and_membership() {
        let ch = Channel::establish(0, participants(&["a", "b"]), ChannelProtocol::Direct);
        assert_eq!(ch.latency, 5.0 + 2.0 * 2.0);
        assert_eq!(ch.bandwidth, MAX_BANDWIDTH);
        assert_eq!(ch.status, ChannelStatus::Active);
    }

    #[test]
    fn protocol_tags_round_trip() {
        for p in [
            ChannelProtocol::Direct,
            ChannelProtocol::SecureTunnel,
            ChannelProtocol::Hierarchical,
        ] {
            assert_eq!(ChannelProtocol::parse(p.tag()).unwrap(), p);
        }
        assert!(matches!(
            ChannelProtocol::parse("carrier_pigeon"),
            Err(FabricError::UnknownProtocol(tag)) if tag == "carrier_pigeon"
        ));
    }
}
