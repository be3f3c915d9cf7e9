use async_trait::async_trait;

/// Verdict from the external policy authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityDecision {
    Granted,
    Denied,
    /// Conditionally approved — do not proceed without further signal.
    Conditional,
    /// Escalated to a human — do not proceed without further signal.
    Escalated,
}

impl AuthorityDecision {
    /// Only Granted lets an action proceed.
    pub fn allows(self) -> bool {
        self == Self::Granted
    }
}

/// External authorization collaborator. Consulted before any action
/// flagged as requiring authorization (channel teardown, fabric
/// shutdown). Policy internals are out of fabric scope.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn authorize(&self, agent: &str, action: &str, resource: &str) -> AuthorityDecision;
}

/// Default authority that grants everything. Used when no external policy
/// engine is wired in.
pub struct AllowAll;

#[async_trait]
impl Authority for AllowAll {
    async fn authorize(&self, _agent: &str, _action: &str, _resource: &str) -> AuthorityDecision {
        AuthorityDecision::Granted
    }
}
