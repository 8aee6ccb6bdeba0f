use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use evgate_gate::EvidenceGate;
use evgate_protocol::{
    AssistRequest, AssistSuggestion, GateInput, GateReport, PermissionDecision, PermissionQuery,
    SafetyReport,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{OrchestratorError, Result};
use crate::ports::{AssistService, PermissionAuthority, SafetyScanner};

/// Policy reference attached to denials synthesized when the authority fails.
pub const COLLABORATOR_FAILURE_REF: &str = "orchestrator/collaborator-failure";

const GATE_ACTOR: &str = "evidence-gate";

const UNTRACEABLE_DECISION: &str =
    "permission authority returned a decision without rationale or policy reference";

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Upper bound for a single collaborator call; expiry counts as a failure.
    pub collaborator_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    InsufficientEvidence {
        report: GateReport,
    },
    Answered {
        report: GateReport,
        suggestion: AssistSuggestion,
    },
}

impl AnswerOutcome {
    #[must_use]
    pub const fn report(&self) -> &GateReport {
        match self {
            AnswerOutcome::InsufficientEvidence { report }
            | AnswerOutcome::Answered { report, .. } => report,
        }
    }
}

/// Result of sequencing one requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The gate did not pass; the authority was not consulted.
    InsufficientEvidence,
    Denied {
        decision: PermissionDecision,
    },
    /// Allowed, but the tree is dirty, holds large files, or could not be scanned.
    NeedsHumanReview {
        decision: PermissionDecision,
        safety: Option<SafetyReport>,
    },
    Proceed {
        decision: PermissionDecision,
        safety: Option<SafetyReport>,
    },
}

impl ActionOutcome {
    #[must_use]
    pub const fn may_proceed(&self) -> bool {
        matches!(self, ActionOutcome::Proceed { .. })
    }

    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            ActionOutcome::InsufficientEvidence => "insufficient_evidence",
            ActionOutcome::Denied { .. } => "denied",
            ActionOutcome::NeedsHumanReview { .. } => "needs_human_review",
            ActionOutcome::Proceed { .. } => "proceed",
        }
    }
}

/// Runs the gate first and only then the permission authority, the safety scan
/// and the assist service.
pub struct Orchestrator {
    gate: EvidenceGate,
    permissions: Arc<dyn PermissionAuthority>,
    safety: Arc<dyn SafetyScanner>,
    assist: Arc<dyn AssistService>,
    audit: Option<Arc<dyn AuditSink>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        gate: EvidenceGate,
        permissions: Arc<dyn PermissionAuthority>,
        safety: Arc<dyn SafetyScanner>,
        assist: Arc<dyn AssistService>,
    ) -> Self {
        Self {
            gate,
            permissions,
            safety,
            assist,
            audit: None,
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    #[must_use]
    pub const fn gate(&self) -> &EvidenceGate {
        &self.gate
    }

    /// Evaluates the gate and records the verdict. The audit sink is called
    /// inline on the current thread.
    pub fn evaluate(&self, input: &GateInput) -> GateReport {
        let report = self.gate.evaluate(input);
        log::debug!(
            "gate {}: satisfied={:?} top_overlap={:.3} thread_provenance={}",
            report.outcome.as_str(),
            report.satisfied,
            report.top_overlap,
            report.thread_provenance
        );
        self.record(AuditEvent {
            actor: GATE_ACTOR.to_string(),
            action: "gate".to_string(),
            subject: input.query.clone(),
            meta: json!({
                "outcome": report.outcome.as_str(),
                "passed": report.passed,
                "satisfied": report.satisfied.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                "top_overlap": report.top_overlap,
                "thread_provenance": report.thread_provenance,
                "evidence": input.evidence.len(),
            }),
        });
        report
    }

    /// Asks the assist service for content only when the gate passes.
    pub async fn answer(&self, input: &GateInput, request: AssistRequest) -> Result<AnswerOutcome> {
        let report = self.evaluate(input);
        if !report.passed {
            return Ok(AnswerOutcome::InsufficientEvidence { report });
        }

        let suggestion = self
            .call("assist", self.assist.assist(request))
            .await
            .map_err(|err| OrchestratorError::Assist(format!("{err:#}")))?;
        Ok(AnswerOutcome::Answered { report, suggestion })
    }

    /// Gate, then permission authority, then (for write/exec) the safety scan.
    pub async fn authorize_action(
        &self,
        report: &GateReport,
        query: PermissionQuery,
    ) -> ActionOutcome {
        let actor = query
            .context
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |ctx| ctx.actor.clone());
        let resource = query.resource_id.clone();
        let action = query.action;

        let outcome = self.sequence_action(report, query).await;
        log::debug!(
            "{} {} by {}: {}",
            action.as_str(),
            resource,
            actor,
            outcome.status()
        );
        self.record_blocking(AuditEvent {
            actor,
            action: action.as_str().to_string(),
            subject: resource,
            meta: action_meta(&outcome),
        })
        .await;
        outcome
    }

    async fn sequence_action(&self, report: &GateReport, query: PermissionQuery) -> ActionOutcome {
        if !report.passed {
            return ActionOutcome::InsufficientEvidence;
        }

        let action = query.action;
        let decision = match self.call("permission authority", self.permissions.check(query)).await {
            Ok(decision) => decision,
            Err(err) => {
                return ActionOutcome::Denied {
                    decision: PermissionDecision::deny(
                        format!("permission authority unavailable: {err:#}"),
                        COLLABORATOR_FAILURE_REF,
                    ),
                }
            }
        };
        if decision.rationale.trim().is_empty() || decision.policy_ref.trim().is_empty() {
            log::warn!("{UNTRACEABLE_DECISION} (allowed={})", decision.allowed);
            return ActionOutcome::Denied {
                decision: PermissionDecision::deny(UNTRACEABLE_DECISION, COLLABORATOR_FAILURE_REF),
            };
        }
        if !decision.allowed {
            return ActionOutcome::Denied { decision };
        }
        if !action.mutates_workspace() {
            return ActionOutcome::Proceed {
                decision,
                safety: None,
            };
        }

        match self.call("safety scan", self.safety.scan()).await {
            Ok(safety) if safety.needs_human_review() => ActionOutcome::NeedsHumanReview {
                decision,
                safety: Some(safety),
            },
            Ok(safety) => ActionOutcome::Proceed {
                decision,
                safety: Some(safety),
            },
            // Unknown tree state is treated as unsafe.
            Err(_) => ActionOutcome::NeedsHumanReview {
                decision,
                safety: None,
            },
        }
    }

    async fn call<T>(
        &self,
        name: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let limit = self.config.collaborator_timeout;
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("{name} timed out after {limit:?}")),
        };
        if let Err(err) = &result {
            log::warn!("{name} failed: {err:#}");
        }
        result
    }

    /// Appends from async context; sink I/O runs on the blocking pool.
    async fn record_blocking(&self, event: AuditEvent) {
        let Some(sink) = self.audit.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || sink.append(event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => log::warn!("Failed to append audit record: {err}"),
            Err(err) => log::warn!("Audit append task failed: {err}"),
        }
    }

    fn record(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            if let Err(err) = sink.append(event) {
                log::warn!("Failed to append audit record: {err}");
            }
        }
    }
}

fn action_meta(outcome: &ActionOutcome) -> serde_json::Value {
    let decision = match outcome {
        ActionOutcome::InsufficientEvidence => None,
        ActionOutcome::Denied { decision }
        | ActionOutcome::NeedsHumanReview { decision, .. }
        | ActionOutcome::Proceed { decision, .. } => Some(decision),
    };
    json!({
        "status": outcome.status(),
        "policy_ref": decision.map(|d| d.policy_ref.as_str()),
        "rationale": decision.map(|d| d.rationale.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn action_outcome_serializes_with_status_tag() {
        let outcome = ActionOutcome::Proceed {
            decision: PermissionDecision::allow("ok", "rules/read"),
            safety: None,
        };
        let value: Value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "proceed");
        assert_eq!(value["decision"]["policy_ref"], "rules/read");
        assert!(outcome.may_proceed());

        let blocked: Value = serde_json::to_value(ActionOutcome::InsufficientEvidence).unwrap();
        assert_eq!(blocked, serde_json::json!({"status": "insufficient_evidence"}));
    }

    #[test]
    fn review_and_denial_do_not_proceed() {
        let decision = PermissionDecision::allow("ok", "rules/write");
        assert!(!ActionOutcome::NeedsHumanReview {
            decision: decision.clone(),
            safety: None
        }
        .may_proceed());
        assert!(!ActionOutcome::Denied { decision }.may_proceed());
        assert!(!ActionOutcome::InsufficientEvidence.may_proceed());
    }

    #[test]
    fn action_meta_carries_policy_reference() {
        let meta = action_meta(&ActionOutcome::Denied {
            decision: PermissionDecision::deny("no", "rules/deny-all"),
        });
        assert_eq!(meta["status"], "denied");
        assert_eq!(meta["policy_ref"], "rules/deny-all");
        assert_eq!(action_meta(&ActionOutcome::InsufficientEvidence)["policy_ref"], Value::Null);
    }
}
