use async_trait::async_trait;
use evgate_protocol::{
    AssistRequest, AssistSuggestion, PermissionDecision, PermissionQuery, SafetyReport,
};

/// Decides whether one concrete action on one resource is allowed.
///
/// Every decision must carry a rationale and the policy rule that produced it.
/// An `Err` is a collaborator failure, never an implicit allow.
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    async fn check(&self, query: PermissionQuery) -> anyhow::Result<PermissionDecision>;
}

/// Reports working-tree state before a write or exec action.
#[async_trait]
pub trait SafetyScanner: Send + Sync {
    async fn scan(&self) -> anyhow::Result<SafetyReport>;
}

/// Produces assistance content once the gate has passed.
#[async_trait]
pub trait AssistService: Send + Sync {
    async fn assist(&self, request: AssistRequest) -> anyhow::Result<AssistSuggestion>;
}
